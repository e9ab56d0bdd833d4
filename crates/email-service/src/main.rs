use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_email_service::config::{ServerConfig, SmtpConfig};
use shop_email_service::mailer::{LogMailer, Mailer, SmtpMailer};
use shop_email_service::{build_app, AppState, EmailService};
use shop_events::shutdown::shutdown_signal;
use shop_events::BusConfig;

const SERVICE_NAME: &str = "email-service";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shop_email_service=debug,shop_events=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid server configuration");
            return ExitCode::FAILURE;
        }
    };
    let bus = match BusConfig::from_env(SERVICE_NAME) {
        Ok(bus) => bus,
        Err(e) => {
            tracing::error!(error = %e, "Invalid bus configuration");
            return ExitCode::FAILURE;
        }
    };
    let smtp = match SmtpConfig::from_env() {
        Ok(smtp) => smtp,
        Err(e) => {
            tracing::error!(error = %e, "Invalid SMTP configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        port = config.port,
        broker_url = %bus.broker_url,
        group = %bus.group_id,
        "Loaded configuration"
    );

    let ip = match config.host.parse() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            return ExitCode::FAILURE;
        }
    };
    let addr = SocketAddr::new(ip, config.port);

    // --- Mailer ---
    let mailer: Arc<dyn Mailer> = match smtp {
        Some(smtp) => match SmtpMailer::new(&smtp) {
            Ok(mailer) => {
                tracing::info!(host = %smtp.host, port = smtp.port, "SMTP mailer configured");
                Arc::new(mailer)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build SMTP mailer");
                return ExitCode::FAILURE;
            }
        },
        None => {
            tracing::warn!("SMTP_HOST not set, mail will be logged instead of sent");
            Arc::new(LogMailer)
        }
    };

    // --- Consumer group ---
    let connection = Arc::new(bus.connection_manager(bus.build_broker()));
    let mut service = EmailService::new(
        connection,
        bus.group_id.clone(),
        bus.consumer_config(),
        mailer,
    );
    if let Err(e) = service.start().await {
        tracing::error!(error = %e, "Failed to start the email consumer");
        return ExitCode::FAILURE;
    }

    // --- Health server ---
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind address");
            let _ = service.stop().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Email service listening");

    let result = axum::serve(listener, build_app(AppState::new(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Post-shutdown cleanup ---
    if let Err(e) = service.stop().await {
        tracing::error!(error = %e, "Email consumer did not stop cleanly");
    }

    match result {
        Ok(()) => {
            tracing::info!("Graceful shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

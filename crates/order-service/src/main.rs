use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_events::shutdown::shutdown_signal;
use shop_events::{BusConfig, Producer};
use shop_order_service::config::ServerConfig;
use shop_order_service::store::InMemoryOrderStore;
use shop_order_service::{build_app, AppState};

const SERVICE_NAME: &str = "order-service";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shop_order_service=debug,shop_events=debug,tower_http=debug".into()
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
    tracing::info!(
        host = %config.host,
        port = config.port,
        broker_url = %bus.broker_url,
        service = %bus.service_name,
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

    // --- Broker connection ---
    let connection = Arc::new(bus.connection_manager(bus.build_broker()));
    if let Err(e) = connection.connect().await {
        tracing::error!(error = %e, "Failed to connect to the broker");
        return ExitCode::FAILURE;
    }

    // --- Producer ---
    let producer = Arc::new(Producer::new(Arc::clone(&connection), bus.producer_config()));

    // --- App state ---
    let state = AppState {
        store: Arc::new(InMemoryOrderStore::new()),
        producer: Arc::clone(&producer),
        connection: Arc::clone(&connection),
        config: Arc::new(config),
        started_at: Utc::now(),
    };

    // --- Start server ---
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind address");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Order service listening");

    let result = axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Post-shutdown cleanup ---
    match Arc::try_unwrap(producer) {
        Ok(producer) => producer.close(bus.publish_timeout).await,
        Err(_) => tracing::warn!("Producer still shared at shutdown; queued publishes may be lost"),
    }
    connection.disconnect().await;

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

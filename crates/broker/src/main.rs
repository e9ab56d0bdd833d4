use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shop_broker::{build_app, ws, AppState, BrokerConfig};
use shop_events::shutdown::shutdown_signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shop_broker=debug,shop_events=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = match BrokerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid broker configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        host = %config.host,
        port = config.port,
        max_message_bytes = config.max_message_bytes,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        "Loaded broker configuration"
    );

    let ip = match config.host.parse() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            return ExitCode::FAILURE;
        }
    };
    let addr = SocketAddr::new(ip, config.port);

    // --- State ---
    let state = AppState::new(config);
    let sessions = Arc::clone(&state.sessions);

    // --- Heartbeat ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(state.clone(), heartbeat_cancel.clone());

    // --- Start server ---
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind broker address");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Broker listening");

    let result = axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Post-shutdown cleanup ---
    let count = sessions.connection_count().await;
    tracing::info!(count, "Closing remaining client sockets");
    sessions.shutdown_all().await;

    heartbeat_cancel.cancel();
    if let Err(e) = heartbeat_handle.await {
        tracing::warn!(error = %e, "Heartbeat task ended abnormally");
    }

    match result {
        Ok(()) => {
            tracing::info!("Broker shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Broker server error");
            ExitCode::FAILURE
        }
    }
}

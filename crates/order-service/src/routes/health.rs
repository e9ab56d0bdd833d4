use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while the broker session is down.
    pub status: &'static str,
    pub version: &'static str,
    pub broker_connected: bool,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
}

/// GET /health -- service and broker connection health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker_connected = state.connection.is_connected().await;
    let now = Utc::now();

    Json(HealthResponse {
        status: if broker_connected { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        broker_connected,
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use shop_events::{ConsumerState, StatsSnapshot};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` while the consumer group is running, `degraded` otherwise.
    pub status: &'static str,
    pub version: &'static str,
    pub consumer: ConsumerState,
    pub mailer: &'static str,
    pub stats: StatsSnapshot,
    pub uptime_secs: i64,
}

/// GET /health -- consumer group state and delivery counters.
///
/// Answers 503 when the group is not running so orchestrators can tell a
/// stalled consumer from a live one.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let consumer = *state.consumer_state.borrow();
    let running = consumer == ConsumerState::Running;

    let body = HealthResponse {
        status: if running { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        consumer,
        mailer: state.mailer,
        stats: state.stats.snapshot(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    };
    let status = if running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

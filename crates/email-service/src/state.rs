use std::sync::Arc;

use chrono::{DateTime, Utc};
use shop_events::{ConsumerState, ConsumerStats};
use tokio::sync::watch;

/// Shared state for the health endpoint.
#[derive(Clone)]
pub struct AppState {
    pub consumer_state: watch::Receiver<ConsumerState>,
    pub stats: Arc<ConsumerStats>,
    pub mailer: &'static str,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: &crate::service::EmailService) -> Self {
        Self {
            consumer_state: service.watch_state(),
            stats: service.stats(),
            mailer: service.mailer_kind(),
            started_at: Utc::now(),
        }
    }
}

use std::sync::Arc;

use shop_events::InMemoryBroker;

use crate::config::BrokerConfig;
use crate::ws::SessionManager;

/// Shared state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Topic logs and consumer-group offsets.
    pub broker: Arc<InMemoryBroker>,
    /// Open client sockets.
    pub sessions: Arc<SessionManager>,
    pub config: Arc<BrokerConfig>,
}

impl AppState {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            broker: Arc::new(InMemoryBroker::with_max_message_bytes(config.max_message_bytes)),
            sessions: Arc::new(SessionManager::new()),
            config: Arc::new(config),
        }
    }
}

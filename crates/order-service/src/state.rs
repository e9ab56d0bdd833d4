use std::sync::Arc;

use chrono::{DateTime, Utc};
use shop_events::{ConnectionManager, Producer};

use crate::config::ServerConfig;
use crate::store::OrderStore;

/// Shared state available to all Axum handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    /// Publishes `order.created` after an order is saved.
    pub producer: Arc<Producer>,
    /// Broker session the producer writes through.
    pub connection: Arc<ConnectionManager>,
    pub config: Arc<ServerConfig>,
    pub started_at: DateTime<Utc>,
}

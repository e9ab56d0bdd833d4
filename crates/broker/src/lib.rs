//! Stand-alone event broker.
//!
//! Holds the topic logs and consumer-group offsets in memory and serves them
//! to remote clients over a WebSocket at `/ws`, speaking the frame protocol
//! defined in `shop_events::broker::protocol`. Exposed as a library so
//! integration tests and the binary entrypoint build the same router.

pub mod app;
pub mod config;
pub mod routes;
pub mod state;
pub mod ws;

pub use app::build_app;
pub use config::BrokerConfig;
pub use state::AppState;

//! Order service.
//!
//! Accepts orders over HTTP, persists them through an [`store::OrderStore`]
//! and announces each one on the `order.created` topic.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;
pub mod state;
pub mod store;

pub use app::build_app;
pub use state::AppState;

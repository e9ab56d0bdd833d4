//! Email service.
//!
//! Consumes `user.created` and `order.created` and sends the matching
//! customer mail through a [`mailer::Mailer`]. Serves `/health` with the
//! consumer group's state and counters.

pub mod app;
pub mod config;
pub mod handlers;
pub mod mailer;
pub mod routes;
pub mod service;
pub mod state;
pub mod templates;

pub use app::build_app;
pub use service::{EmailService, ServiceError};
pub use state::AppState;

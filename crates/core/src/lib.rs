//! Shared domain types for the shop services.
//!
//! - [`topics`]: well-known topic names and the [`TopicPayload`] binding.
//! - [`events`]: typed payload records carried on the event bus.
//! - [`order`]: order records and input validation.
//! - [`money`]: minor-unit amount formatting.

pub mod error;
pub mod events;
pub mod money;
pub mod order;
pub mod topics;
pub mod types;

pub use events::{OrderCreated, ShopEvent, UserCreated};
pub use topics::TopicPayload;

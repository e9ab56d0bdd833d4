//! Well-known topic name constants.
//!
//! These must match the topic names used by every service on the bus. The
//! producer side (order service, account service) and the consumer side
//! (email service) both refer to these constants rather than literals.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Published once a new user account has been created.
pub const USER_CREATED: &str = "user.created";

/// Published once a new order has been persisted.
pub const ORDER_CREATED: &str = "order.created";

/// Binds a payload record to the topic it travels on.
///
/// Implemented by every typed event in [`crate::events`]. The bus uses the
/// associated constant to pick the topic when publishing and to register a
/// typed handler when consuming.
pub trait TopicPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Topic name the payload is published to.
    const TOPIC: &'static str;
}

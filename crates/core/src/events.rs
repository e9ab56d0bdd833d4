//! Typed payload records carried on the event bus.
//!
//! Each topic has exactly one payload record. [`ShopEvent`] is the sum type
//! over all of them, keyed by topic name, for consumers that treat every
//! event the same way after decoding (the email service renders one mail
//! per event).

use serde::{Deserialize, Serialize};

use crate::topics::{TopicPayload, ORDER_CREATED, USER_CREATED};
use crate::types::Cents;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of `user.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub email: String,
    pub username: String,
}

impl TopicPayload for UserCreated {
    const TOPIC: &'static str = USER_CREATED;
}

/// Payload of `order.created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Identifier of the persisted order, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub email: String,
    /// Order total in minor currency units.
    pub amount: Cents,
    /// Payment status, rendered verbatim by consumers.
    pub status: String,
}

impl TopicPayload for OrderCreated {
    const TOPIC: &'static str = ORDER_CREATED;
}

// ---------------------------------------------------------------------------
// ShopEvent
// ---------------------------------------------------------------------------

/// Any event known to the platform, keyed by topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopEvent {
    UserCreated(UserCreated),
    OrderCreated(OrderCreated),
}

impl ShopEvent {
    /// Topic this event travels on.
    pub fn topic(&self) -> &'static str {
        match self {
            ShopEvent::UserCreated(_) => UserCreated::TOPIC,
            ShopEvent::OrderCreated(_) => OrderCreated::TOPIC,
        }
    }
}

impl From<UserCreated> for ShopEvent {
    fn from(event: UserCreated) -> Self {
        ShopEvent::UserCreated(event)
    }
}

impl From<OrderCreated> for ShopEvent {
    fn from(event: OrderCreated) -> Self {
        ShopEvent::OrderCreated(event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

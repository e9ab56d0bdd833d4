//! Order records and input validation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::events::OrderCreated;
use crate::types::{Cents, Timestamp, UserId};

/// Input for creating an order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub email: String,
    /// Order total in minor currency units.
    pub amount: Cents,
    pub status: String,
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub id: String,
    pub user_id: UserId,
    pub email: String,
    pub amount: Cents,
    pub status: String,
    pub created_at: Timestamp,
}

impl OrderRecord {
    /// The `order.created` event announcing this order.
    pub fn created_event(&self) -> OrderCreated {
        OrderCreated {
            order_id: Some(self.id.clone()),
            email: self.email.clone(),
            amount: self.amount,
            status: self.status.clone(),
        }
    }
}

/// Validate a new order before it is persisted.
///
/// Rules:
/// - `email` must be non-empty and contain exactly one `@` with text on both sides.
/// - `amount` must be strictly positive.
/// - `status` must be non-empty.
pub fn validate_new_order(order: &NewOrder) -> Result<(), CoreError> {
    let email = order.email.trim();
    let mut parts = email.split('@');
    let valid_email = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty()
    );
    if !valid_email {
        return Err(CoreError::Validation(format!(
            "Invalid email address: '{}'",
            order.email
        )));
    }

    if order.amount <= 0 {
        return Err(CoreError::Validation(format!(
            "Order amount must be positive, got {}",
            order.amount
        )));
    }

    if order.status.trim().is_empty() {
        return Err(CoreError::Validation("Order status is required".into()));
    }

    Ok(())
}

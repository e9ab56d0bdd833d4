//! Mail bodies for the events the service reacts to.
//!
//! Each builder returns `None` when the event carries no recipient; such
//! events are acknowledged without sending anything.

use shop_core::money::format_minor_units;
use shop_core::{OrderCreated, ShopEvent, UserCreated};

use crate::mailer::MailRequest;

pub const WELCOME_SUBJECT: &str = "Welcome to our store";
pub const ORDER_SUBJECT: &str = "Your order has been created";

/// The mail an event triggers, if it names a recipient.
pub fn mail_for(event: &ShopEvent) -> Option<MailRequest> {
    match event {
        ShopEvent::UserCreated(user) => welcome_mail(user),
        ShopEvent::OrderCreated(order) => order_mail(order),
    }
}

pub fn welcome_mail(event: &UserCreated) -> Option<MailRequest> {
    recipient(&event.email).map(|to| MailRequest {
        to,
        subject: WELCOME_SUBJECT.to_string(),
        body: format!(
            "Welcome {}. Your account has been created!",
            event.username
        ),
    })
}

/// The amount is rendered from minor units (`2599` → `25.99`); the status
/// is copied verbatim.
pub fn order_mail(event: &OrderCreated) -> Option<MailRequest> {
    recipient(&event.email).map(|to| MailRequest {
        to,
        subject: ORDER_SUBJECT.to_string(),
        body: format!(
            "Hello, your order: Amount: {}, Status: {}",
            format_minor_units(event.amount),
            event.status
        ),
    })
}

fn recipient(email: &str) -> Option<String> {
    let email = email.trim();
    (!email.is_empty()).then(|| email.to_string())
}

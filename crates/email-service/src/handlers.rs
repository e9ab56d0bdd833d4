//! Topic handlers of the email service.
//!
//! Each payload is decoded by its typed handler, lifted into a
//! [`ShopEvent`] and mailed through one delivery path.

use std::sync::Arc;

use shop_core::{OrderCreated, ShopEvent, UserCreated};
use shop_events::{HandlerError, HandlerRegistry, RegistrationError};

use crate::mailer::Mailer;
use crate::templates::mail_for;

/// Registry for `group` with a handler for each topic the service mails on.
pub fn registry(group: &str, mailer: Arc<dyn Mailer>) -> Result<HandlerRegistry, RegistrationError> {
    let mut registry = HandlerRegistry::new(group);

    let welcome = Arc::clone(&mailer);
    registry.register_typed(move |event: UserCreated| {
        let mailer = Arc::clone(&welcome);
        async move { deliver(mailer.as_ref(), event.into()).await }
    })?;

    registry.register_typed(move |event: OrderCreated| {
        let mailer = Arc::clone(&mailer);
        async move { deliver(mailer.as_ref(), event.into()).await }
    })?;

    Ok(registry)
}

async fn deliver(mailer: &dyn Mailer, event: ShopEvent) -> Result<(), HandlerError> {
    let topic = event.topic();
    let Some(mail) = mail_for(&event) else {
        tracing::debug!(topic, "Event has no recipient, skipping mail");
        return Ok(());
    };

    let sent = mailer.send_mail(mail).await.map_err(HandlerError::failed)?;
    tracing::debug!(topic, to = %sent.to, response = %sent.response, "Mail delivered");
    Ok(())
}

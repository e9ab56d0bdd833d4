//! Email service bootstrap: consumer group wiring and lifecycle.

use std::sync::Arc;

use shop_events::{
    ConnectionManager, ConsumerConfig, ConsumerError, ConsumerGroup, ConsumerState,
    ConsumerStats, RegistrationError,
};
use tokio::sync::watch;

use crate::handlers;
use crate::mailer::Mailer;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

/// The email service's consumer group and its mailer.
pub struct EmailService {
    consumer: ConsumerGroup,
    mailer: Arc<dyn Mailer>,
}

impl EmailService {
    pub fn new(
        connection: Arc<ConnectionManager>,
        group_id: impl Into<String>,
        config: ConsumerConfig,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            consumer: ConsumerGroup::new(connection, group_id, config),
            mailer,
        }
    }

    /// Connect, subscribe to every mailed topic and start consuming.
    ///
    /// Fails on the first step that fails; nothing is retried.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        let registry = handlers::registry(self.consumer.group_id(), Arc::clone(&self.mailer))?;
        let topics = registry.topics();

        self.consumer.connect().await?;
        self.consumer.subscribe(registry).await?;
        self.consumer.start()?;

        tracing::info!(
            group = %self.consumer.group_id(),
            topics = ?topics.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            mailer = self.mailer.kind(),
            "Email service consuming"
        );
        Ok(())
    }

    /// Drain in-flight handlers and leave the group.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        self.consumer.stop().await?;
        let stats = self.consumer.stats().snapshot();
        tracing::info!(?stats, "Email service stopped");
        Ok(())
    }

    pub fn state(&self) -> ConsumerState {
        self.consumer.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.consumer.watch_state()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.consumer.stats()
    }

    pub fn mailer_kind(&self) -> &'static str {
        self.mailer.kind()
    }
}

//! Topic handler registry.
//!
//! Each service builds one [`HandlerRegistry`] at startup, registering one
//! [`TopicHandler`] per topic, and hands it to its consumer group. A second
//! handler for the same topic is a configuration error, never a silent
//! replacement.

use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shop_core::TopicPayload;

use crate::codec::DecodeError;
use crate::envelope::Envelope;
use crate::topic::{Topic, TopicError};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Why a handler invocation did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),

    #[error("Handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wrap any domain error as a handler failure.
    pub fn failed(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Failed(err.into())
    }
}

/// Side effect run for each message on a topic.
///
/// Handlers are invoked on their own task under a timeout; they must not
/// assume they hold any bus lock.
#[async_trait]
pub trait TopicHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Adapter that decodes the topic's payload before calling a closure.
struct TypedHandler<E, F> {
    handler: F,
    _payload: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, F, Fut> TopicHandler for TypedHandler<E, F>
where
    E: TopicPayload,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let payload: E = envelope.decode_value()?;
        (self.handler)(payload).await
    }
}

/// Adapter for closures that take the raw envelope.
struct FnHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut> TopicHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        (self.handler)(envelope.clone()).await
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("A handler for topic '{topic}' is already registered in consumer group '{group}'")]
pub struct DuplicateHandlerError {
    pub topic: Topic,
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateHandlerError),

    #[error(transparent)]
    InvalidTopic(#[from] TopicError),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Topic → handler map for one consumer group.
pub struct HandlerRegistry {
    group: String,
    handlers: BTreeMap<Topic, Arc<dyn TopicHandler>>,
}

impl HandlerRegistry {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            handlers: BTreeMap::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Register `handler` for `topic`.
    pub fn register(
        &mut self,
        topic: Topic,
        handler: impl TopicHandler,
    ) -> Result<(), DuplicateHandlerError> {
        self.register_arc(topic, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        topic: Topic,
        handler: Arc<dyn TopicHandler>,
    ) -> Result<(), DuplicateHandlerError> {
        if self.handlers.contains_key(&topic) {
            return Err(DuplicateHandlerError {
                topic,
                group: self.group.clone(),
            });
        }

        tracing::debug!(group = %self.group, topic = %topic, "Registered topic handler");
        self.handlers.insert(topic, handler);
        Ok(())
    }

    /// Register a closure for `E::TOPIC` that receives the decoded payload.
    ///
    /// A message whose value does not match `E` fails with
    /// [`HandlerError::Decode`] before the closure runs.
    pub fn register_typed<E, F, Fut>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        E: TopicPayload,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let topic = Topic::of::<E>()?;
        let handler = TypedHandler {
            handler,
            _payload: PhantomData::<fn() -> E>,
        };
        Ok(self.register(topic, handler)?)
    }

    /// Register a closure that receives the whole envelope.
    pub fn register_fn<F, Fut>(&mut self, topic: Topic, handler: F) -> Result<(), DuplicateHandlerError>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.register(topic, FnHandler { handler })
    }

    pub fn resolve(&self, topic: &Topic) -> Option<Arc<dyn TopicHandler>> {
        self.handlers.get(topic).cloned()
    }

    /// Registered topics in name order.
    pub fn topics(&self) -> Vec<Topic> {
        self.handlers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

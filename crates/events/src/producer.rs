//! Event producer.
//!
//! [`Producer::publish`] wraps a payload in an [`Envelope`], encodes it and
//! hands it to a single writer task through a bounded queue. The writer
//! appends records to the broker one at a time, so publishes from one
//! producer reach each topic in call order.
//!
//! A publish never starts while the [`ConnectionManager`] reports
//! disconnected, and every publish is bounded by the publish timeout.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shop_core::TopicPayload;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::BrokerError;
use crate::codec::SerializationError;
use crate::connection::ConnectionManager;
use crate::envelope::Envelope;
use crate::topic::{Topic, TopicError};

/// Default bound on a whole publish call.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default depth of the writer queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub publish_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// The broker accepted the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub topic: Topic,
    pub offset: u64,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    NotConnected,
    BrokerRejected,
    Timeout,
    Serialization,
    InvalidTopic,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Not connected to the broker")]
    NotConnected,

    #[error("Broker rejected record for topic '{topic}': {reason}")]
    BrokerRejected { topic: Topic, reason: String },

    #[error("Publishing to topic '{topic}' timed out after {timeout:?}")]
    Timeout { topic: Topic, timeout: Duration },

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    InvalidTopic(#[from] TopicError),
}

impl PublishError {
    pub fn kind(&self) -> PublishErrorKind {
        match self {
            PublishError::NotConnected => PublishErrorKind::NotConnected,
            PublishError::BrokerRejected { .. } => PublishErrorKind::BrokerRejected,
            PublishError::Timeout { .. } => PublishErrorKind::Timeout,
            PublishError::Serialization(_) => PublishErrorKind::Serialization,
            PublishError::InvalidTopic(_) => PublishErrorKind::InvalidTopic,
        }
    }
}

struct PublishJob {
    topic: Topic,
    message_id: Uuid,
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<Ack, PublishError>>,
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

/// Publishes envelopes through one writer task.
pub struct Producer {
    connection: Arc<ConnectionManager>,
    queue: mpsc::Sender<PublishJob>,
    writer: JoinHandle<()>,
    config: ProducerConfig,
}

impl Producer {
    /// Create a producer and spawn its writer task.
    pub fn new(connection: Arc<ConnectionManager>, config: ProducerConfig) -> Self {
        let (queue, jobs) = mpsc::channel(config.queue_depth.max(1));
        let writer = tokio::spawn(run_writer(Arc::clone(&connection), jobs));

        Self {
            connection,
            queue,
            writer,
            config,
        }
    }

    /// Publish `payload` to `topic`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &Topic,
        payload: &T,
    ) -> Result<Ack, PublishError> {
        let envelope = Envelope::new(
            topic.clone(),
            self.connection.identity().service_name.clone(),
            payload,
        )?;
        self.publish_envelope(envelope).await
    }

    /// Publish a typed event to its bound topic.
    pub async fn publish_event<E: TopicPayload>(&self, event: &E) -> Result<Ack, PublishError> {
        let topic = Topic::of::<E>()?;
        self.publish(&topic, event).await
    }

    /// Publish an already-built envelope (dead-lettering, replays).
    ///
    /// The connected check, the queue wait and the broker reply all count
    /// against the publish timeout.
    pub async fn publish_envelope(&self, envelope: Envelope) -> Result<Ack, PublishError> {
        let bytes = envelope.to_bytes()?;
        let topic = envelope.topic;
        let (reply, accepted) = oneshot::channel();
        let job = PublishJob {
            topic: topic.clone(),
            message_id: envelope.metadata.message_id,
            bytes,
            reply,
        };

        let timeout = self.config.publish_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            if !self.connection.is_connected().await {
                self.connection.reconnect_in_background();
                return Err(PublishError::NotConnected);
            }
            self.queue
                .send(job)
                .await
                .map_err(|_| PublishError::NotConnected)?;
            accepted.await.map_err(|_| PublishError::NotConnected)?
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(topic = %topic, ?timeout, "Publish timed out");
                Err(PublishError::Timeout { topic, timeout })
            }
        }
    }

    /// Stop accepting publishes and wait up to `timeout` for queued records
    /// to be written.
    pub async fn close(self, timeout: Duration) {
        let Producer { queue, writer, .. } = self;
        drop(queue);

        if tokio::time::timeout(timeout, writer).await.is_err() {
            tracing::warn!(?timeout, "Producer writer did not drain in time");
        }
    }
}

async fn run_writer(connection: Arc<ConnectionManager>, mut jobs: mpsc::Receiver<PublishJob>) {
    while let Some(job) = jobs.recv().await {
        // The caller already timed out; do not append behind its back.
        if job.reply.is_closed() {
            tracing::debug!(topic = %job.topic, "Dropping publish abandoned by caller");
            continue;
        }

        let PublishJob {
            topic,
            message_id,
            bytes,
            reply,
        } = job;
        let result = write_record(&connection, topic, message_id, bytes).await;
        let _ = reply.send(result);
    }

    tracing::debug!(client = %connection.identity(), "Producer writer stopped");
}

async fn write_record(
    connection: &Arc<ConnectionManager>,
    topic: Topic,
    message_id: Uuid,
    bytes: Vec<u8>,
) -> Result<Ack, PublishError> {
    if !connection.is_connected().await {
        return Err(PublishError::NotConnected);
    }

    match connection.broker().publish(&topic, bytes).await {
        Ok(offset) => {
            tracing::debug!(topic = %topic, offset, %message_id, "Published event");
            Ok(Ack {
                topic,
                offset,
                message_id,
            })
        }
        Err(e) if e.is_connection_loss() => {
            tracing::warn!(topic = %topic, error = %e, "Publish failed, connection lost");
            connection.mark_lost().await;
            connection.reconnect_in_background();
            Err(PublishError::NotConnected)
        }
        Err(BrokerError::Rejected(reason)) => Err(PublishError::BrokerRejected { topic, reason }),
        Err(BrokerError::Timeout(timeout)) => Err(PublishError::Timeout { topic, timeout }),
        Err(e) => Err(PublishError::BrokerRejected {
            topic,
            reason: e.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

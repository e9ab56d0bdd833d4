//! Broker seam.
//!
//! [`Broker`] is the narrow interface the bus needs from a message broker:
//! open and close a client session, append a record to a topic, and pull
//! records for a consumer group with committed offsets.
//!
//! Two implementations are provided:
//!
//! - [`InMemoryBroker`]: per-topic append-only logs held in process. Used
//!   by tests, by single-process deployments, and as the storage engine of
//!   the stand-alone broker server.
//! - [`RemoteBroker`]: WebSocket client speaking the
//!   [`protocol`] to a broker server.

use std::time::Duration;

use async_trait::async_trait;

use crate::connection::ClientIdentity;
use crate::topic::Topic;

pub mod memory;
pub mod protocol;
pub mod remote;

pub use memory::InMemoryBroker;
pub use remote::RemoteBroker;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A record as stored by the broker: an opaque payload at an offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: Topic,
    /// Position in the topic log, starting at 0.
    pub offset: u64,
    /// Encoded [`Envelope`](crate::envelope::Envelope) bytes.
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors reported by a broker implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached when opening a session.
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// An established session dropped, or no session is open.
    #[error("Connection to broker lost: {0}")]
    ConnectionLost(String),

    /// The broker refused the request (record too large, unknown client).
    #[error("Broker rejected request: {0}")]
    Rejected(String),

    /// The broker did not answer in time.
    #[error("Broker did not answer within {0:?}")]
    Timeout(Duration),

    /// The broker answered with something the client does not understand.
    #[error("Broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Whether the session is gone and the caller should reconnect.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionLost(_) | BrokerError::Unreachable(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Message broker operations used by the connection manager, producer and
/// consumer group.
///
/// Offsets follow the usual log convention: a group's committed offset is
/// the next offset it will read, so committing record `n` stores `n + 1`.
/// Joining a group rewinds its fetch position to the committed offset, which
/// redelivers anything fetched but never committed.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Human-readable target for logs (URL or `memory://`).
    fn target(&self) -> String;

    /// Open a session for `client`.
    async fn connect(&self, client: &ClientIdentity) -> Result<(), BrokerError>;

    /// Close the session for `client`. Never fails; errors are logged.
    async fn disconnect(&self, client: &ClientIdentity);

    /// Append `payload` to `topic` and return its offset.
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<u64, BrokerError>;

    /// Register `group` as a consumer of `topics`.
    async fn join(&self, group: &str, topics: &[Topic]) -> Result<(), BrokerError>;

    /// Return up to `max` records for `group`, waiting at most `wait` for the
    /// first one. An empty batch means nothing arrived in time.
    async fn fetch(
        &self,
        group: &str,
        topics: &[Topic],
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Record>, BrokerError>;

    /// Mark the record at `offset` on `topic` as consumed by `group`.
    async fn commit(&self, group: &str, topic: &Topic, offset: u64) -> Result<(), BrokerError>;
}

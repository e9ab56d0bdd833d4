//! Inter-service event bus.
//!
//! Services publish typed events to named topics and consume them through
//! consumer groups, with at-least-once delivery over a pluggable broker.
//!
//! - [`topic`]: validated topic names.
//! - [`codec`] / [`envelope`]: JSON wire format, message metadata, log redaction.
//! - [`broker`]: the broker seam with in-memory and WebSocket implementations.
//! - [`connection`] / [`reconnect`]: session lifecycle and backoff.
//! - [`producer`]: ordered, timeout-bounded publishing.
//! - [`registry`]: topic → handler map supplied by each service.
//! - [`consumer`]: consumer group state machine, dispatch and shutdown.
//! - [`stats`]: consumer counters.
//! - [`config`]: environment configuration.
//! - [`shutdown`]: the SIGINT/SIGTERM trigger used by the service binaries.

pub mod broker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod envelope;
pub mod producer;
pub mod reconnect;
pub mod registry;
pub mod shutdown;
pub mod stats;
pub mod topic;

pub use broker::{Broker, BrokerError, InMemoryBroker, Record, RemoteBroker};
pub use codec::{DecodeError, SerializationError};
pub use config::{BusConfig, ConfigError};
pub use connection::{ClientIdentity, Connected, ConnectionError, ConnectionManager};
pub use consumer::{ConsumerConfig, ConsumerError, ConsumerGroup, ConsumerState, FailurePolicy};
pub use envelope::{Envelope, Metadata};
pub use producer::{Ack, Producer, ProducerConfig, PublishError, PublishErrorKind};
pub use registry::{DuplicateHandlerError, HandlerError, HandlerRegistry, RegistrationError, TopicHandler};
pub use stats::{ConsumerStats, StatsSnapshot};
pub use topic::{Topic, TopicError};

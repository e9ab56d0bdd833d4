//! In-memory broker.
//!
//! Thread-safe per-topic append-only logs with per-group committed offsets
//! and fetch positions. Waiting fetches are woken through a
//! [`tokio::sync::Notify`] whenever a record is appended.
//!
//! Besides tests and single-process deployments, this is the storage
//! engine behind the stand-alone broker server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Broker, BrokerError, Record};
use crate::connection::ClientIdentity;
use crate::topic::Topic;

/// Default upper bound for a single record (1 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Per-topic append-only logs shared by all clients.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use shop_events::broker::{Broker, InMemoryBroker};
/// use shop_events::Topic;
///
/// # tokio_test_block_on(async {
/// let broker = InMemoryBroker::new();
/// let topic = Topic::new("user.created").unwrap();
///
/// let offset = broker.publish(&topic, b"{}".to_vec()).await.unwrap();
/// assert_eq!(offset, 0);
///
/// let batch = broker
///     .fetch("email-service", &[topic], 10, Duration::ZERO)
///     .await
///     .unwrap();
/// assert_eq!(batch.len(), 1);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    appended: Notify,
    available: AtomicBool,
    max_message_bytes: usize,
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<Topic, Vec<Vec<u8>>>,
    groups: HashMap<String, GroupState>,
    clients: HashSet<String>,
}

#[derive(Default)]
struct GroupState {
    /// Next offset to read after a (re)join, per topic.
    committed: HashMap<Topic, u64>,
    /// Next offset to hand out, per topic.
    position: HashMap<Topic, u64>,
}

impl InMemoryBroker {
    /// Create an empty broker accepting records up to 1 MiB.
    pub fn new() -> Self {
        Self::with_max_message_bytes(DEFAULT_MAX_MESSAGE_BYTES)
    }

    /// Create an empty broker with a custom record size limit.
    pub fn with_max_message_bytes(max_message_bytes: usize) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            appended: Notify::new(),
            available: AtomicBool::new(true),
            max_message_bytes,
        }
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    ///
    /// While unavailable, `connect` fails with [`BrokerError::Unreachable`]
    /// and every other operation with [`BrokerError::ConnectionLost`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        // Wake waiting fetches so they observe the change.
        self.appended.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Names of clients with an open session.
    pub async fn connected_clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self.state.lock().await.clients.iter().cloned().collect();
        clients.sort();
        clients
    }

    /// Number of records ever appended to `topic`.
    pub async fn topic_len(&self, topic: &Topic) -> u64 {
        self.state
            .lock()
            .await
            .logs
            .get(topic)
            .map_or(0, |log| log.len() as u64)
    }

    /// All records currently stored on `topic`, oldest first.
    pub async fn records(&self, topic: &Topic) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .logs
            .get(topic)
            .map(|log| {
                log.iter()
                    .enumerate()
                    .map(|(offset, payload)| Record {
                        topic: topic.clone(),
                        offset: offset as u64,
                        payload: payload.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The committed offset of `group` on `topic`, if it ever committed.
    pub async fn committed_offset(&self, group: &str, topic: &Topic) -> Option<u64> {
        self.state
            .lock()
            .await
            .groups
            .get(group)
            .and_then(|g| g.committed.get(topic).copied())
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::ConnectionLost("broker unavailable".into()))
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    /// Hand out up to `max` records, one topic at a time in round-robin so a
    /// busy topic cannot starve the others.
    fn take(&mut self, group: &str, topics: &[Topic], max: usize) -> Vec<Record> {
        let BrokerState { logs, groups, .. } = self;
        let group = groups.entry(group.to_string()).or_default();
        let mut batch = Vec::new();

        loop {
            let mut progressed = false;

            for topic in topics {
                if batch.len() >= max {
                    break;
                }
                let committed = group.committed.get(topic).copied().unwrap_or(0);
                let position = group.position.entry(topic.clone()).or_insert(committed);

                let next = logs
                    .get(topic)
                    .and_then(|log| log.get(*position as usize));
                if let Some(payload) = next {
                    batch.push(Record {
                        topic: topic.clone(),
                        offset: *position,
                        payload: payload.clone(),
                    });
                    *position += 1;
                    progressed = true;
                }
            }

            if !progressed || batch.len() >= max {
                return batch;
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn target(&self) -> String {
        "memory://".to_string()
    }

    async fn connect(&self, client: &ClientIdentity) -> Result<(), BrokerError> {
        if !self.is_available() {
            return Err(BrokerError::Unreachable("broker unavailable".into()));
        }
        self.state
            .lock()
            .await
            .clients
            .insert(client.service_name.clone());
        Ok(())
    }

    async fn disconnect(&self, client: &ClientIdentity) {
        self.state.lock().await.clients.remove(&client.service_name);
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<u64, BrokerError> {
        self.ensure_available()?;

        if payload.len() > self.max_message_bytes {
            return Err(BrokerError::Rejected(format!(
                "record of {} bytes exceeds the {} byte limit",
                payload.len(),
                self.max_message_bytes
            )));
        }

        let offset = {
            let mut state = self.state.lock().await;
            let log = state.logs.entry(topic.clone()).or_default();
            log.push(payload);
            (log.len() - 1) as u64
        };

        self.appended.notify_waiters();
        Ok(offset)
    }

    async fn join(&self, group: &str, topics: &[Topic]) -> Result<(), BrokerError> {
        self.ensure_available()?;

        let mut state = self.state.lock().await;
        let group_state = state.groups.entry(group.to_string()).or_default();
        for topic in topics {
            let committed = group_state.committed.get(topic).copied().unwrap_or(0);
            group_state.position.insert(topic.clone(), committed);
        }
        Ok(())
    }

    async fn fetch(
        &self,
        group: &str,
        topics: &[Topic],
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Record>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register for wake-ups before looking, so an append between the
            // check and the wait is not missed.
            let appended = self.appended.notified();

            self.ensure_available()?;
            let batch = self.state.lock().await.take(group, topics, max.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(remaining, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self, group: &str, topic: &Topic, offset: u64) -> Result<(), BrokerError> {
        self.ensure_available()?;

        let mut state = self.state.lock().await;
        let committed = state
            .groups
            .entry(group.to_string())
            .or_default()
            .committed
            .entry(topic.clone())
            .or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

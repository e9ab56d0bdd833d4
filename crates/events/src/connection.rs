//! Broker connection lifecycle.
//!
//! [`ConnectionManager`] owns the session of one named client with the
//! broker: connect (idempotent, bounded by a timeout), disconnect, and
//! reconnect with exponential backoff after a session is lost. One manager
//! is created per process at startup and shared through an `Arc` by the
//! producer and the consumer group.
//!
//! Connect attempts are serialized by their own lock and never hold the
//! session state lock, so [`ConnectionManager::is_connected`] answers
//! immediately even while an attempt is waiting on an unresponsive host.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use shop_core::types::Timestamp;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, BrokerError};
use crate::reconnect::ReconnectConfig;

/// Default bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Name a service uses on the bus. Namespaces producer and consumer
/// sessions and consumer-group membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClientIdentity {
    pub service_name: String,
}

impl ClientIdentity {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service_name)
    }
}

/// Proof of an established session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connected {
    pub client: ClientIdentity,
    pub since: Timestamp,
}

/// Why a connection could not be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Broker at {target} is unreachable: {reason}")]
    Unreachable { target: String, reason: String },

    #[error("Connecting to broker at {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("Broker at {target} rejected client: {reason}")]
    Rejected { target: String, reason: String },

    /// The manager was disconnected while the attempt was in flight.
    #[error("Connection to broker at {target} was closed")]
    Closed { target: String },
}

impl ConnectionError {
    /// Human-readable cause, without the target prefix.
    pub fn reason(&self) -> String {
        match self {
            ConnectionError::Unreachable { reason, .. } | ConnectionError::Rejected { reason, .. } => {
                reason.clone()
            }
            ConnectionError::Timeout { timeout, .. } => format!("timed out after {timeout:?}"),
            ConnectionError::Closed { .. } => "closed by disconnect".to_string(),
        }
    }

    /// Stable label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Unreachable { .. } => "unreachable",
            ConnectionError::Timeout { .. } => "timeout",
            ConnectionError::Rejected { .. } => "rejected",
            ConnectionError::Closed { .. } => "closed",
        }
    }

    fn from_broker(target: String, err: BrokerError) -> Self {
        match err {
            BrokerError::Rejected(reason) => ConnectionError::Rejected { target, reason },
            BrokerError::Timeout(timeout) => ConnectionError::Timeout { target, timeout },
            other => ConnectionError::Unreachable {
                target,
                reason: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Lifecycle owner for one client's broker session.
pub struct ConnectionManager {
    identity: ClientIdentity,
    broker: Arc<dyn Broker>,
    state: RwLock<Option<Connected>>,
    connect_timeout: Duration,
    reconnect: ReconnectConfig,
    /// One connect attempt at a time.
    connect_lock: Mutex<()>,
    /// One backoff loop at a time.
    reconnect_lock: Mutex<()>,
    /// Cancelled on disconnect and drop, which stops background reconnects.
    /// An explicit `connect` after a disconnect installs a fresh token.
    closing: std::sync::Mutex<CancellationToken>,
    reconnect_attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(identity: ClientIdentity, broker: Arc<dyn Broker>) -> Self {
        Self {
            identity,
            broker,
            state: RwLock::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            connect_lock: Mutex::new(()),
            reconnect_lock: Mutex::new(()),
            closing: std::sync::Mutex::new(CancellationToken::new()),
            reconnect_attempts: AtomicU64::new(0),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = config;
        self
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Reconnect attempts made over the manager's lifetime.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Open the broker session.
    ///
    /// Idempotent: when already connected the existing session is returned
    /// without touching the broker. Failures are returned, never retried.
    /// Reopens a manager that was previously disconnected.
    pub async fn connect(&self) -> Result<Connected, ConnectionError> {
        {
            let mut closing = self.closing.lock().unwrap_or_else(PoisonError::into_inner);
            if closing.is_cancelled() {
                *closing = CancellationToken::new();
            }
        }
        self.establish().await
    }

    async fn establish(&self) -> Result<Connected, ConnectionError> {
        if let Some(connected) = self.current().await {
            return Ok(connected);
        }

        let _attempt = self.connect_lock.lock().await;
        // Another caller may have finished while we waited.
        if let Some(connected) = self.current().await {
            return Ok(connected);
        }

        let lifetime = self.closing_token();
        let target = self.broker.target();
        if lifetime.is_cancelled() {
            return Err(ConnectionError::Closed { target });
        }

        match tokio::time::timeout(self.connect_timeout, self.broker.connect(&self.identity)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ConnectionError::from_broker(target, e)),
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    target,
                    timeout: self.connect_timeout,
                })
            }
        }

        // Checked under the state lock: disconnect cancels before it takes
        // the state, so a session published here is always seen by it.
        let mut state = self.state.write().await;
        if lifetime.is_cancelled() {
            drop(state);
            self.broker.disconnect(&self.identity).await;
            return Err(ConnectionError::Closed { target });
        }

        let connected = Connected {
            client: self.identity.clone(),
            since: Utc::now(),
        };
        *state = Some(connected.clone());
        tracing::info!(client = %self.identity, target = %target, "Connected to broker");
        Ok(connected)
    }

    /// Close the broker session. Safe to call when not connected.
    pub async fn disconnect(&self) {
        self.closing_token().cancel();

        let was_connected = self.state.write().await.take().is_some();
        if was_connected {
            self.broker.disconnect(&self.identity).await;
            tracing::info!(client = %self.identity, "Disconnected from broker");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// The current session, if any.
    pub async fn current(&self) -> Option<Connected> {
        self.state.read().await.clone()
    }

    /// Record that the session dropped underneath us.
    pub async fn mark_lost(&self) {
        if self.state.write().await.take().is_some() {
            tracing::warn!(client = %self.identity, "Broker connection lost");
        }
    }

    /// Retry the session with exponential backoff until connected or
    /// `cancel` fires. The first attempt is immediate.
    ///
    /// Concurrent callers wait for the loop already running and then see
    /// its result.
    pub async fn reconnect(&self, cancel: &CancellationToken) -> Option<Connected> {
        let _loop = tokio::select! {
            guard = self.reconnect_lock.lock() => guard,
            _ = cancel.cancelled() => return None,
        };

        if let Some(connected) = self.current().await {
            return Some(connected);
        }

        let target = self.broker.target();
        let mut waits = self.reconnect.backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(client = %self.identity, target = %target, attempt, "Reconnect cancelled");
                    return None;
                }
                result = self.establish() => result,
            };

            let error = match result {
                Ok(connected) => {
                    tracing::info!(client = %self.identity, target = %target, attempt, "Broker session restored");
                    return Some(connected);
                }
                Err(e) => e,
            };

            let wait = waits.next().unwrap_or(self.reconnect.max_delay);
            tracing::warn!(
                client = %self.identity,
                target = %target,
                attempt,
                error_kind = error.kind(),
                reason = %error.reason(),
                retry_in_ms = wait.as_millis() as u64,
                "Broker reconnect failed",
            );

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Start a backoff loop without waiting for it.
    ///
    /// Returns `None` when a loop is already running or the manager is
    /// disconnected. The loop stops on [`disconnect`](Self::disconnect).
    pub fn reconnect_in_background(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let cancel = self.closing_token();
        if cancel.is_cancelled() || self.reconnect_lock.try_lock().is_err() {
            return None;
        }

        let manager = Arc::clone(self);
        Some(tokio::spawn(async move {
            manager.reconnect(&cancel).await;
        }))
    }

    fn closing_token(&self) -> CancellationToken {
        self.closing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.closing
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();

        if self.state.get_mut().take().is_none() {
            return;
        }

        tracing::warn!(
            client = %self.identity,
            "Connection manager dropped while connected, releasing broker session",
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let broker = Arc::clone(&self.broker);
            let identity = self.identity.clone();
            handle.spawn(async move {
                broker.disconnect(&identity).await;
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::broker::{InMemoryBroker, Record};
    use crate::topic::Topic;

    fn manager(broker: &Arc<InMemoryBroker>) -> ConnectionManager {
        ConnectionManager::new(ClientIdentity::new("order-service"), broker.clone())
    }

    /// Holds every `connect` until `release` is notified.
    struct GatedBroker {
        inner: InMemoryBroker,
        release: Notify,
    }

    impl GatedBroker {
        fn new() -> Self {
            Self {
                inner: InMemoryBroker::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl Broker for GatedBroker {
        fn target(&self) -> String {
            "gated://".into()
        }

        async fn connect(&self, client: &ClientIdentity) -> Result<(), BrokerError> {
            self.release.notified().await;
            self.inner.connect(client).await
        }

        async fn disconnect(&self, client: &ClientIdentity) {
            self.inner.disconnect(client).await
        }

        async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<u64, BrokerError> {
            self.inner.publish(topic, payload).await
        }

        async fn join(&self, group: &str, topics: &[Topic]) -> Result<(), BrokerError> {
            self.inner.join(group, topics).await
        }

        async fn fetch(
            &self,
            group: &str,
            topics: &[Topic],
            max: usize,
            wait: Duration,
        ) -> Result<Vec<Record>, BrokerError> {
            self.inner.fetch(group, topics, max, wait).await
        }

        async fn commit(&self, group: &str, topic: &Topic, offset: u64) -> Result<(), BrokerError> {
            self.inner.commit(group, topic, offset).await
        }
    }

    // -----------------------------------------------------------------------
    // Test: connect and disconnect
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn connect_is_idempotent() {
        let broker = Arc::new(InMemoryBroker::new());
        let manager = manager(&broker);

        let first = manager.connect().await.unwrap();
        let second = manager.connect().await.unwrap();

        assert_eq!(first, second);
        assert!(manager.is_connected().await);
        assert_eq!(broker.connected_clients().await, vec!["order-service".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_broker_is_reported_without_retry() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let manager = manager(&broker);

        let err = manager.connect().await.unwrap_err();
        assert_matches!(err, ConnectionError::Unreachable { ref target, .. } if target == "memory://");
        assert_eq!(err.kind(), "unreachable");
        assert!(!err.reason().is_empty());
        assert!(!manager.is_connected().await);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test]
    async fn disconnect_releases_the_session() {
        let broker = Arc::new(InMemoryBroker::new());
        let manager = manager(&broker);

        manager.connect().await.unwrap();
        manager.disconnect().await;

        assert!(!manager.is_connected().await);
        assert!(broker.connected_clients().await.is_empty());

        // Second disconnect is a no-op.
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn mark_lost_clears_state() {
        let broker = Arc::new(InMemoryBroker::new());
        let manager = manager(&broker);

        manager.connect().await.unwrap();
        manager.mark_lost().await;
        assert!(!manager.is_connected().await);
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn dropping_connected_manager_releases_session() {
        let broker = Arc::new(InMemoryBroker::new());
        {
            let manager = manager(&broker);
            manager.connect().await.unwrap();
        }

        // The release runs on a spawned task.
        for _ in 0..10 {
            if broker.connected_clients().await.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(broker.connected_clients().await.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test: a slow connect attempt does not block state readers
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn pending_connect_leaves_state_readable() {
        let broker = Arc::new(GatedBroker::new());
        let manager = Arc::new(
            ConnectionManager::new(ClientIdentity::new("order-service"), broker.clone())
                .with_connect_timeout(Duration::from_secs(2)),
        );

        let attempt = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let answered = tokio::time::timeout(Duration::from_millis(100), manager.is_connected()).await;
        assert_eq!(answered, Ok(false));

        broker.release.notify_one();
        attempt.await.unwrap().unwrap();
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn disconnect_during_connect_wins() {
        let broker = Arc::new(GatedBroker::new());
        let manager = Arc::new(ConnectionManager::new(
            ClientIdentity::new("order-service"),
            broker.clone(),
        ));

        let attempt = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.disconnect().await;
        broker.release.notify_one();

        let err = attempt.await.unwrap().unwrap_err();
        assert_matches!(err, ConnectionError::Closed { ref target } if target == "gated://");
        assert!(!manager.is_connected().await);
        assert!(broker.inner.connected_clients().await.is_empty());
    }

    // -----------------------------------------------------------------------
    // Test: reconnect with backoff
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_reconnect_makes_no_attempt() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let manager = manager(&broker);

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(manager.reconnect(&cancel).await.is_none());
        assert!(!manager.is_connected().await);
        assert_eq!(manager.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_until_broker_returns() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let manager = Arc::new(manager(&broker));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.reconnect(&CancellationToken::new()).await })
        };

        // Attempts at 0s, 1s and 3s fail; the one at 7s succeeds.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.reconnect_attempts(), 3);
        broker.set_available(true);

        let connected = task.await.unwrap().expect("session restored");
        assert_eq!(connected.client.service_name, "order-service");
        assert_eq!(manager.reconnect_attempts(), 4);
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn background_reconnect_runs_once() {
        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(manager(&broker));

        let handle = manager.reconnect_in_background().expect("first loop starts");
        handle.await.unwrap();
        assert!(manager.is_connected().await);

        manager.disconnect().await;
        assert!(manager.reconnect_in_background().is_none());
    }

    #[tokio::test]
    async fn connect_after_disconnect_reenables_background_reconnect() {
        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(manager(&broker));

        manager.connect().await.unwrap();
        manager.disconnect().await;
        manager.connect().await.unwrap();
        manager.mark_lost().await;

        let handle = manager
            .reconnect_in_background()
            .expect("reopened manager can reconnect");
        handle.await.unwrap();
        assert!(manager.is_connected().await);
    }
}

//! Consumer group.
//!
//! A [`ConsumerGroup`] subscribes one service to the topics of its
//! [`HandlerRegistry`] under a group id, pulls records from the broker and
//! dispatches each to the handler of its topic.
//!
//! ## Tasks
//!
//! - **Pull loop**: long-polls the broker and routes each record to the
//!   worker of its topic. Records for unregistered topics are dropped with a
//!   warning and committed. After any failed fetch it rejoins the group,
//!   which rewinds to the committed offset; on a lost connection it first
//!   reconnects with backoff.
//! - **Topic workers**: one per registered topic, fed through a bounded
//!   queue. A worker handles its topic's records in order; different topics
//!   run concurrently. Each invocation runs on its own task under the handler
//!   timeout so errors, panics and hangs are contained.
//!
//! ## Delivery
//!
//! At-least-once. After a handler succeeds, or fails and the
//! [`FailurePolicy`] has run, the record's offset is committed. Records that
//! were fetched but not committed when the group stopped are redelivered on
//! the next start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use crate::broker::{BrokerError, Record};
use crate::connection::{Connected, ConnectionError, ConnectionManager};
use crate::envelope::Envelope;
use crate::producer::{Producer, ProducerConfig};
use crate::registry::{HandlerError, HandlerRegistry, TopicHandler};
use crate::stats::ConsumerStats;
use crate::topic::Topic;

/// Pause after a non-connection fetch error before polling again.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens when a handler fails.
#[derive(Debug, Clone)]
pub struct FailurePolicy {
    /// Extra attempts after the first failure. `0` means no retry.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub retry_backoff: Duration,
    /// Topic that receives the original envelope once attempts run out.
    pub dead_letter_topic: Option<Topic>,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_backoff: Duration::from_millis(500),
            dead_letter_topic: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Longest a single fetch waits for new records.
    pub fetch_wait: Duration,
    pub fetch_max_records: usize,
    /// Bound on one handler invocation.
    pub handler_timeout: Duration,
    /// Bound on draining in-flight handlers in [`ConsumerGroup::stop`].
    pub shutdown_timeout: Duration,
    /// Records buffered per topic worker before the pull loop waits.
    pub worker_queue_depth: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fetch_wait: Duration::from_millis(500),
            fetch_max_records: 64,
            handler_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            worker_queue_depth: 64,
            failure_policy: FailurePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// State & errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Created,
    Connected,
    Subscribed,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("Cannot {action} a consumer group in state {state:?}")]
    InvalidState {
        action: &'static str,
        state: ConsumerState,
    },

    #[error("Registry is for group '{registry}', consumer group is '{group}'")]
    GroupMismatch { registry: String, group: String },

    #[error("No topics to subscribe for consumer group '{0}'")]
    NoSubscriptions(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

// ---------------------------------------------------------------------------
// Consumer group
// ---------------------------------------------------------------------------

pub struct ConsumerGroup {
    group_id: String,
    connection: Arc<ConnectionManager>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
    registry: Option<Arc<HandlerRegistry>>,
    /// Topics joined on the broker; may include topics without a handler.
    topics: Vec<Topic>,
    stats: Arc<ConsumerStats>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerGroup {
    pub fn new(
        connection: Arc<ConnectionManager>,
        group_id: impl Into<String>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Created);
        Self {
            group_id: group_id.into(),
            connection,
            config,
            state,
            registry: None,
            topics: Vec::new(),
            stats: Arc::new(ConsumerStats::default()),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Observe state changes (health endpoints, tests).
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(group = %self.group_id, from = ?previous, to = ?next, "Consumer state changed");
    }

    fn expect_state(&self, expected: ConsumerState, action: &'static str) -> Result<(), ConsumerError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(ConsumerError::InvalidState { action, state })
        }
    }

    /// Open the broker session. `Created → Connected`.
    pub async fn connect(&mut self) -> Result<Connected, ConsumerError> {
        self.expect_state(ConsumerState::Created, "connect")?;
        let connected = self.connection.connect().await?;
        self.set_state(ConsumerState::Connected);
        Ok(connected)
    }

    /// Join the group for every topic in `registry`. `Connected → Subscribed`.
    pub async fn subscribe(&mut self, registry: HandlerRegistry) -> Result<(), ConsumerError> {
        self.subscribe_with_topics(registry, &[]).await
    }

    /// Join the group for the registry's topics plus `extra` topics.
    ///
    /// Records arriving on an extra topic without a handler are dropped with
    /// a warning and committed.
    pub async fn subscribe_with_topics(
        &mut self,
        registry: HandlerRegistry,
        extra: &[Topic],
    ) -> Result<(), ConsumerError> {
        self.expect_state(ConsumerState::Connected, "subscribe")?;

        if registry.group() != self.group_id {
            return Err(ConsumerError::GroupMismatch {
                registry: registry.group().to_string(),
                group: self.group_id.clone(),
            });
        }

        let mut topics = registry.topics();
        for topic in extra {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        if topics.is_empty() {
            return Err(ConsumerError::NoSubscriptions(self.group_id.clone()));
        }

        self.connection.broker().join(&self.group_id, &topics).await?;

        tracing::info!(
            group = %self.group_id,
            topics = ?topics.iter().map(Topic::as_str).collect::<Vec<_>>(),
            handlers = registry.len(),
            "Subscribed consumer group",
        );
        self.registry = Some(Arc::new(registry));
        self.topics = topics;
        self.set_state(ConsumerState::Subscribed);
        Ok(())
    }

    /// Spawn the pull loop and topic workers. `Subscribed → Running`.
    pub fn start(&mut self) -> Result<(), ConsumerError> {
        self.expect_state(ConsumerState::Subscribed, "start")?;
        let registry = self
            .registry
            .clone()
            .ok_or_else(|| ConsumerError::NoSubscriptions(self.group_id.clone()))?;

        let dead_letter = self
            .config
            .failure_policy
            .dead_letter_topic
            .as_ref()
            .map(|_| {
                Arc::new(Producer::new(
                    Arc::clone(&self.connection),
                    ProducerConfig::default(),
                ))
            });

        let ctx = Arc::new(DispatchContext {
            group_id: self.group_id.clone(),
            connection: Arc::clone(&self.connection),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            dead_letter,
            cancel: self.cancel.clone(),
        });

        let mut routes = HashMap::with_capacity(registry.len());
        for topic in registry.topics() {
            let Some(handler) = registry.resolve(&topic) else {
                continue;
            };
            let (tx, rx) = mpsc::channel(self.config.worker_queue_depth.max(1));
            routes.insert(topic.clone(), tx);
            self.tasks.push(tokio::spawn(run_topic_worker(
                Arc::clone(&ctx),
                topic,
                handler,
                rx,
            )));
        }

        self.tasks.push(tokio::spawn(run_pull_loop(
            ctx,
            routes,
            self.topics.clone(),
        )));

        self.set_state(ConsumerState::Running);
        tracing::info!(group = %self.group_id, "Consumer group started");
        Ok(())
    }

    /// Stop pulling, let in-flight handlers finish within the shutdown
    /// timeout, then release the connection. `* → Stopped`.
    ///
    /// Workers start no new handler once stop begins. Handlers still running
    /// when the timeout elapses are aborted and counted as abandoned; their
    /// records stay uncommitted and are redelivered on the next start.
    pub async fn stop(&mut self) -> Result<(), ConsumerError> {
        match self.state() {
            ConsumerState::Stopped => return Ok(()),
            ConsumerState::Running => {}
            _ => {
                self.cancel.cancel();
                self.connection.disconnect().await;
                self.set_state(ConsumerState::Stopped);
                return Ok(());
            }
        }

        self.set_state(ConsumerState::Stopping);
        tracing::info!(group = %self.group_id, "Stopping consumer group");
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.tasks);
        let abort_handles: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let timeout = self.config.shutdown_timeout;

        if tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            let abandoned: Vec<_> = abort_handles.iter().filter(|h| !h.is_finished()).collect();
            tracing::warn!(
                group = %self.group_id,
                ?timeout,
                abandoned = abandoned.len(),
                "Shutdown timeout elapsed, abandoning in-flight handlers",
            );
            self.stats.record_abandoned(abandoned.len() as u64);
            for handle in abandoned {
                handle.abort();
            }
        }

        self.connection.disconnect().await;
        self.set_state(ConsumerState::Stopped);
        tracing::info!(group = %self.group_id, "Consumer group stopped");
        Ok(())
    }
}

impl Drop for ConsumerGroup {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

struct DispatchContext {
    group_id: String,
    connection: Arc<ConnectionManager>,
    config: ConsumerConfig,
    stats: Arc<ConsumerStats>,
    dead_letter: Option<Arc<Producer>>,
    cancel: CancellationToken,
}

impl DispatchContext {
    async fn commit(&self, topic: &Topic, offset: u64) {
        if let Err(e) = self
            .connection
            .broker()
            .commit(&self.group_id, topic, offset)
            .await
        {
            // Not fatal: the record is redelivered after the next rejoin.
            tracing::warn!(group = %self.group_id, topic = %topic, offset, error = %e, "Offset commit failed");
        }
    }
}

async fn run_pull_loop(
    ctx: Arc<DispatchContext>,
    routes: HashMap<Topic, mpsc::Sender<Record>>,
    topics: Vec<Topic>,
) {
    let broker = Arc::clone(ctx.connection.broker());
    // A failed fetch may have advanced the group past records we never saw.
    // Rejoining rewinds to the committed offset before the next fetch.
    let mut rejoin = false;

    'pull: loop {
        if rejoin {
            let joined = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                joined = broker.join(&ctx.group_id, &topics) => joined,
            };
            match joined {
                Ok(()) => rejoin = false,
                Err(e) => {
                    tracing::warn!(group = %ctx.group_id, error = %e, "Rejoin failed");
                    if !recover(&ctx, &e).await {
                        break;
                    }
                    continue;
                }
            }
        }

        let fetched = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            fetched = broker.fetch(
                &ctx.group_id,
                &topics,
                ctx.config.fetch_max_records,
                ctx.config.fetch_wait,
            ) => fetched,
        };

        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(group = %ctx.group_id, error = %e, "Fetch failed");
                if !recover(&ctx, &e).await {
                    break;
                }
                rejoin = true;
                continue;
            }
        };

        for record in records {
            ctx.stats.record_received();

            let Some(worker) = routes.get(&record.topic) else {
                tracing::warn!(
                    group = %ctx.group_id,
                    topic = %record.topic,
                    offset = record.offset,
                    "No handler registered for topic, dropping message",
                );
                ctx.stats.record_dropped_no_handler();
                ctx.commit(&record.topic, record.offset).await;
                continue;
            };

            let delivered = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => false,
                sent = worker.send(record) => sent.is_ok(),
            };
            if !delivered {
                break 'pull;
            }
        }
    }

    tracing::debug!(group = %ctx.group_id, "Pull loop exited");
}

/// Wait out a failed broker call: reconnect when the session is gone,
/// otherwise back off briefly. Returns `false` once the group is stopping.
async fn recover(ctx: &DispatchContext, err: &BrokerError) -> bool {
    if err.is_connection_loss() {
        ctx.connection.mark_lost().await;
        return ctx.connection.reconnect(&ctx.cancel).await.is_some();
    }

    tokio::select! {
        _ = ctx.cancel.cancelled() => false,
        _ = tokio::time::sleep(FETCH_ERROR_BACKOFF) => true,
    }
}

async fn run_topic_worker(
    ctx: Arc<DispatchContext>,
    topic: Topic,
    handler: Arc<dyn TopicHandler>,
    mut records: mpsc::Receiver<Record>,
) {
    loop {
        // Cancellation wins over queued records: no new handler after stop.
        let record = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            record = records.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        process_record(&ctx, &handler, record).await;
    }

    tracing::debug!(group = %ctx.group_id, topic = %topic, "Topic worker exited");
}

async fn process_record(ctx: &DispatchContext, handler: &Arc<dyn TopicHandler>, record: Record) {
    let Record { topic, offset, payload } = record;

    let mut envelope = match Envelope::from_bytes(&payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(
                group = %ctx.group_id,
                topic = %topic,
                offset,
                error = %e,
                "Undecodable message, skipping",
            );
            ctx.stats.record_decode_error();
            ctx.commit(&topic, offset).await;
            return;
        }
    };
    envelope.offset = Some(offset);

    let policy = &ctx.config.failure_policy;
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let err = match invoke(handler, &envelope, ctx.config.handler_timeout).await {
            Ok(()) => {
                ctx.stats.record_handled();
                tracing::debug!(
                    group = %ctx.group_id,
                    topic = %topic,
                    offset,
                    message_id = %envelope.metadata.message_id,
                    "Handled message",
                );
                break;
            }
            Err(err) => err,
        };

        if attempts <= policy.max_retries {
            tracing::warn!(
                group = %ctx.group_id,
                topic = %topic,
                offset,
                attempt = attempts,
                error = %err,
                "Handler failed, retrying",
            );
            ctx.stats.record_retry();

            let resumed = tokio::select! {
                _ = ctx.cancel.cancelled() => false,
                _ = tokio::time::sleep(policy.retry_backoff) => true,
            };
            if !resumed {
                // Leave uncommitted; redelivered on the next start.
                return;
            }
            continue;
        }

        tracing::error!(
            group = %ctx.group_id,
            topic = %topic,
            offset,
            message_id = %envelope.metadata.message_id,
            attempts,
            error = %err,
            payload = %envelope.redacted_value(),
            "Handler failed, message consumed",
        );
        ctx.stats.record_failed();
        dead_letter(ctx, &envelope, &err, attempts).await;
        break;
    }

    ctx.commit(&topic, offset).await;
}

/// Run one handler invocation on its own task, bounded by `timeout`.
async fn invoke(
    handler: &Arc<dyn TopicHandler>,
    envelope: &Envelope,
    timeout: Duration,
) -> Result<(), HandlerError> {
    let handler = Arc::clone(handler);
    let envelope = envelope.clone();
    let mut task = AbortOnDropHandle::new(tokio::spawn(async move {
        handler.handle(&envelope).await
    }));

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) if join_error.is_panic() => {
            Err(HandlerError::Panicked(panic_message(join_error.into_panic())))
        }
        Ok(Err(_)) => Err(HandlerError::Panicked("handler task cancelled".into())),
        Err(_) => Err(HandlerError::TimedOut(timeout)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn dead_letter(ctx: &DispatchContext, envelope: &Envelope, err: &HandlerError, attempts: u32) {
    let (Some(topic), Some(producer)) = (&ctx.config.failure_policy.dead_letter_topic, &ctx.dead_letter)
    else {
        return;
    };

    let mut parked = envelope.clone();
    parked.topic = topic.clone();
    parked.offset = None;
    let parked = parked
        .with_header("x-original-topic", envelope.topic.as_str())
        .with_header(
            "x-original-offset",
            envelope.offset.map(|o| o.to_string()).unwrap_or_default(),
        )
        .with_header("x-consumer-group", ctx.group_id.as_str())
        .with_header("x-error", err.to_string())
        .with_header("x-attempts", attempts.to_string());

    match producer.publish_envelope(parked).await {
        Ok(ack) => {
            ctx.stats.record_dead_lettered();
            tracing::info!(
                group = %ctx.group_id,
                topic = %envelope.topic,
                dead_letter_topic = %ack.topic,
                dead_letter_offset = ack.offset,
                "Message moved to dead-letter topic",
            );
        }
        Err(e) => {
            tracing::error!(
                group = %ctx.group_id,
                topic = %envelope.topic,
                error = %e,
                "Failed to publish to dead-letter topic",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::connection::ClientIdentity;

    fn group(broker: &Arc<InMemoryBroker>) -> ConsumerGroup {
        let connection = Arc::new(ConnectionManager::new(
            ClientIdentity::new("email-service"),
            broker.clone(),
        ));
        ConsumerGroup::new(connection, "email-service", ConsumerConfig::default())
    }

    fn registry_with(topic: &str) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new("email-service");
        registry
            .register_fn(Topic::new(topic).unwrap(), |_| async { Ok(()) })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn lifecycle_walks_every_state() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut consumer = group(&broker);
        assert_eq!(consumer.state(), ConsumerState::Created);

        consumer.connect().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Connected);

        consumer.subscribe(registry_with("user.created")).await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Subscribed);

        consumer.start().unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);

        consumer.stop().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        assert!(broker.connected_clients().await.is_empty());
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut consumer = group(&broker);

        assert_matches!(
            consumer.subscribe(registry_with("a")).await,
            Err(ConsumerError::InvalidState { action: "subscribe", state: ConsumerState::Created })
        );
        assert_matches!(
            consumer.start(),
            Err(ConsumerError::InvalidState { action: "start", .. })
        );

        consumer.connect().await.unwrap();
        assert_matches!(
            consumer.connect().await,
            Err(ConsumerError::InvalidState { action: "connect", state: ConsumerState::Connected })
        );
    }

    #[tokio::test]
    async fn empty_or_foreign_registry_is_refused() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut consumer = group(&broker);
        consumer.connect().await.unwrap();

        assert_matches!(
            consumer.subscribe(HandlerRegistry::new("email-service")).await,
            Err(ConsumerError::NoSubscriptions(_))
        );
        assert_matches!(
            consumer
                .subscribe_with_topics(HandlerRegistry::new("email-service"), &[])
                .await,
            Err(ConsumerError::NoSubscriptions(_))
        );

        let mut foreign = HandlerRegistry::new("audit-service");
        foreign
            .register_fn(Topic::new("a").unwrap(), |_| async { Ok(()) })
            .unwrap();
        assert_matches!(
            consumer.subscribe(foreign).await,
            Err(ConsumerError::GroupMismatch { .. })
        );
        assert_eq!(consumer.state(), ConsumerState::Connected);
    }

    #[tokio::test]
    async fn connect_failure_is_typed() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.set_available(false);
        let mut consumer = group(&broker);

        assert_matches!(
            consumer.connect().await,
            Err(ConsumerError::Connection(ConnectionError::Unreachable { .. }))
        );
        assert_eq!(consumer.state(), ConsumerState::Created);
    }

    #[tokio::test]
    async fn stop_before_start_goes_straight_to_stopped() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut consumer = group(&broker);
        consumer.connect().await.unwrap();

        consumer.stop().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Stopped);
        // Idempotent.
        consumer.stop().await.unwrap();
    }

    #[test]
    fn panic_message_extracts_strings() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }
}

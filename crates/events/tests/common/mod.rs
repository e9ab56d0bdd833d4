//! Shared helpers for the event bus integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shop_core::OrderCreated;
use shop_events::{
    ClientIdentity, ConnectionManager, ConsumerConfig, ConsumerGroup, HandlerRegistry,
    InMemoryBroker, Producer, ProducerConfig, Topic,
};

pub const GROUP: &str = "email-service";

pub fn topic(name: &str) -> Topic {
    Topic::new(name).unwrap()
}

/// Consumer settings tuned for fast tests.
pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        fetch_wait: Duration::from_millis(50),
        handler_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(2),
        ..ConsumerConfig::default()
    }
}

/// A connected producer on `broker`.
pub async fn producer(broker: &Arc<InMemoryBroker>) -> Producer {
    let connection = Arc::new(ConnectionManager::new(
        ClientIdentity::new("order-service"),
        broker.clone(),
    ));
    connection.connect().await.unwrap();
    Producer::new(connection, ProducerConfig::default())
}

/// A consumer group for [`GROUP`] with its own connection.
pub fn consumer(broker: &Arc<InMemoryBroker>, config: ConsumerConfig) -> ConsumerGroup {
    let connection = Arc::new(ConnectionManager::new(
        ClientIdentity::new(GROUP),
        broker.clone(),
    ));
    ConsumerGroup::new(connection, GROUP, config)
}

/// Connect, subscribe and start `consumer`.
pub async fn start(consumer: &mut ConsumerGroup, registry: HandlerRegistry) {
    consumer.connect().await.unwrap();
    consumer.subscribe(registry).await.unwrap();
    consumer.start().unwrap();
}

pub fn order(amount: i64) -> OrderCreated {
    OrderCreated {
        order_id: None,
        email: "b@x.com".into(),
        amount,
        status: "paid".into(),
    }
}

/// Shared, append-only record of what handlers saw.
pub struct Seen<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Seen<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Seen<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Seen<T> {
    pub fn push(&self, item: T) {
        self.0.lock().unwrap().push(item);
    }

    pub fn items(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Poll `condition` every 10 ms for up to 5 s.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

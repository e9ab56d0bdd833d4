//! Shared helpers for the email service integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shop_email_service::mailer::{MailError, MailRequest, Mailer, Sent};
use shop_email_service::EmailService;
use shop_events::{
    ClientIdentity, ConnectionManager, ConsumerConfig, InMemoryBroker, Producer, ProducerConfig,
};

pub const GROUP: &str = "email-service";

/// Mailer that records every request. Mail to `fail@` addresses fails.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailRequest>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<MailRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(&self, mail: MailRequest) -> Result<Sent, MailError> {
        if mail.to.starts_with("fail@") {
            return Err(MailError::Build("relay refused".into()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(Sent {
            to: mail.to,
            response: "250 OK".into(),
        })
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        fetch_wait: Duration::from_millis(50),
        handler_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(2),
        ..ConsumerConfig::default()
    }
}

pub struct Harness {
    pub broker: Arc<InMemoryBroker>,
    pub mailer: Arc<RecordingMailer>,
    pub service: EmailService,
    pub producer: Producer,
}

/// A started email service and a connected producer on one in-memory broker.
pub async fn start_service() -> Harness {
    let broker = Arc::new(InMemoryBroker::new());
    let mailer = Arc::new(RecordingMailer::default());

    let connection = Arc::new(ConnectionManager::new(
        ClientIdentity::new(GROUP),
        broker.clone(),
    ));
    let mut service = EmailService::new(connection, GROUP, fast_config(), mailer.clone());
    service.start().await.unwrap();

    let producer_conn = Arc::new(ConnectionManager::new(
        ClientIdentity::new("order-service"),
        broker.clone(),
    ));
    producer_conn.connect().await.unwrap();
    let producer = Producer::new(producer_conn, ProducerConfig::default());

    Harness {
        broker,
        mailer,
        service,
        producer,
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

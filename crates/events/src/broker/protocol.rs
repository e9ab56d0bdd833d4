//! Broker wire protocol.
//!
//! WebSocket text frames carrying JSON. Every request carries a client-chosen
//! `id` that the broker echoes on the matching response, so several requests
//! may be in flight on one socket.
//!
//! ```text
//! -> {"id":1,"op":"publish","topic":"order.created","payload":"{...}"}
//! <- {"id":1,"result":{"status":"published","offset":0}}
//! ```
//!
//! `payload` is the envelope JSON text exactly as the codec produced it.

use serde::{Deserialize, Serialize};

use super::{BrokerError, Record};
use crate::topic::Topic;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Hello {
        client: String,
    },
    Publish {
        topic: Topic,
        payload: String,
    },
    Join {
        group: String,
        topics: Vec<Topic>,
    },
    Fetch {
        group: String,
        topics: Vec<Topic>,
        max: usize,
        wait_ms: u64,
    },
    Commit {
        group: String,
        topic: Topic,
        offset: u64,
    },
}

impl Request {
    /// Operation name, for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::Publish { .. } => "publish",
            Request::Join { .. } => "join",
            Request::Fetch { .. } => "fetch",
            Request::Commit { .. } => "commit",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub result: Response,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Published { offset: u64 },
    Records { records: Vec<WireRecord> },
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub topic: Topic,
    pub offset: u64,
    pub payload: String,
}

/// Error categories carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Rejected,
    Unavailable,
    Protocol,
}

impl Response {
    /// Translate a broker-side error into a wire response.
    pub fn from_error(err: &BrokerError) -> Self {
        let (kind, message) = match err {
            BrokerError::Rejected(m) => (ErrorKind::Rejected, m.clone()),
            BrokerError::Unreachable(m) | BrokerError::ConnectionLost(m) => {
                (ErrorKind::Unavailable, m.clone())
            }
            BrokerError::Timeout(_) => (ErrorKind::Unavailable, err.to_string()),
            BrokerError::Protocol(m) => (ErrorKind::Protocol, m.clone()),
        };
        Response::Error { kind, message }
    }

    /// The error carried by this response, if it is one.
    pub fn into_error(self) -> Result<Self, BrokerError> {
        match self {
            Response::Error { kind, message } => Err(match kind {
                ErrorKind::Rejected => BrokerError::Rejected(message),
                ErrorKind::Unavailable => BrokerError::ConnectionLost(message),
                ErrorKind::Protocol => BrokerError::Protocol(message),
            }),
            other => Ok(other),
        }
    }
}

impl From<Record> for WireRecord {
    fn from(record: Record) -> Self {
        Self {
            topic: record.topic,
            offset: record.offset,
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        }
    }
}

impl From<WireRecord> for Record {
    fn from(record: WireRecord) -> Self {
        Self {
            topic: record.topic,
            offset: record.offset,
            payload: record.payload.into_bytes(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

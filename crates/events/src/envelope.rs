//! Message envelope carried across the broker.
//!
//! An [`Envelope`] wraps a topic's JSON value together with delivery
//! metadata. It is encoded with the [`codec`](crate::codec) and stored by the
//! broker as an opaque record; the broker-assigned offset is attached when
//! the record is received.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shop_core::types::Timestamp;
use uuid::Uuid;

use crate::codec::{self, DecodeError, SerializationError};
use crate::topic::Topic;

/// Delivery metadata attached by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Unique, time-ordered message id.
    pub message_id: Uuid,
    /// Service name of the producing client.
    pub producer: String,
    /// When the producer built the envelope (UTC).
    pub published_at: Timestamp,
    /// Free-form string headers (dead-letter context, tracing ids).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// A logical event: topic, JSON value and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub value: serde_json::Value,
    pub metadata: Metadata,
    /// Broker-assigned position, set on receipt and never serialized.
    #[serde(skip)]
    pub offset: Option<u64>,
}

impl Envelope {
    /// Build an envelope for `payload` on `topic`.
    pub fn new<T: Serialize + ?Sized>(
        topic: Topic,
        producer: impl Into<String>,
        payload: &T,
    ) -> Result<Self, SerializationError> {
        Ok(Self {
            topic,
            value: serde_json::to_value(payload)?,
            metadata: Metadata {
                message_id: Uuid::now_v7(),
                producer: producer.into(),
                published_at: Utc::now(),
                headers: BTreeMap::new(),
            },
            offset: None,
        })
    }

    /// Attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.headers.insert(key.into(), value.into());
        self
    }

    /// Encode the envelope for the broker.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        codec::encode(self)
    }

    /// Decode an envelope received from the broker.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::decode(bytes)
    }

    /// Decode the value into the typed record for this topic.
    pub fn decode_value<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        T::deserialize(&self.value).map_err(|source| DecodeError::Shape {
            topic: self.topic.to_string(),
            source,
        })
    }

    /// A copy of the value with sensitive fields masked, for logging.
    pub fn redacted_value(&self) -> serde_json::Value {
        codec::redact(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use shop_core::{OrderCreated, UserCreated};

    use super::*;

    fn topic(name: &str) -> Topic {
        Topic::new(name).unwrap()
    }

    #[test]
    fn envelope_round_trips_through_bytes() {
        let payload = UserCreated {
            email: "a@x.com".into(),
            username: "Ann".into(),
        };
        let envelope = Envelope::new(topic("user.created"), "account-service", &payload)
            .unwrap()
            .with_header("trace-id", "abc");

        let decoded = Envelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.decode_value::<UserCreated>().unwrap(), payload);
    }

    #[test]
    fn wire_format_is_plain_json() {
        let envelope = Envelope::new(
            topic("order.created"),
            "order-service",
            &json!({"email": "b@x.com", "amount": 2599, "status": "paid"}),
        )
        .unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(raw["topic"], "order.created");
        assert_eq!(raw["value"]["amount"], 2599);
        assert_eq!(raw["metadata"]["producer"], "order-service");
        assert!(raw.get("offset").is_none());
        assert!(raw["metadata"].get("headers").is_none());
    }

    #[test]
    fn empty_topic_on_the_wire_is_rejected() {
        let bytes = br#"{"topic":"","value":{},"metadata":{"message_id":"0190b0c4-7e5c-7000-8000-000000000000","producer":"x","published_at":"2024-01-01T00:00:00Z"}}"#;
        assert_matches!(Envelope::from_bytes(bytes), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn wrong_shape_is_reported_with_topic() {
        let envelope = Envelope::new(
            topic("order.created"),
            "order-service",
            &json!({"email": "b@x.com", "amount": "lots", "status": "paid"}),
        )
        .unwrap();

        assert_matches!(
            envelope.decode_value::<OrderCreated>(),
            Err(DecodeError::Shape { topic, .. }) if topic == "order.created"
        );
    }
}

//! JSON payload codec.
//!
//! Payloads travel as UTF-8 JSON. Integers are kept as JSON integers end to
//! end, so minor-unit amounts never pass through floating point: decoding a
//! fractional number into an integer field is a [`DecodeError`], not a
//! silent truncation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The payload could not be represented as JSON.
#[derive(Debug, thiserror::Error)]
#[error("Payload serialization failed: {0}")]
pub struct SerializationError(#[from] serde_json::Error);

/// Bytes received from the broker could not be turned back into a payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not a well-formed message.
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The message is well-formed but its value does not match the record
    /// registered for the topic.
    #[error("Payload does not match the {topic} record: {source}")]
    Shape {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode a payload as JSON bytes.
pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>, SerializationError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Decode JSON bytes produced by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(bytes).map_err(DecodeError::Malformed)
}

// ---------------------------------------------------------------------------
// Redaction
// ---------------------------------------------------------------------------

/// Replacement for masked values.
const MASK: &str = "***";

/// Key fragments whose values are masked entirely.
const SECRET_KEY_FRAGMENTS: [&str; 5] = ["password", "token", "secret", "card", "address"];

/// Return a copy of `value` safe to put in logs.
///
/// Email fields keep only their domain (`"***@x.com"`); fields whose key
/// contains `password`, `token`, `secret`, `card` or `address` are replaced
/// with `"***"`. Nested objects and arrays are walked recursively.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), redact_field(key, v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn redact_field(key: &str, value: &Value) -> Value {
    let key = key.to_ascii_lowercase();

    if SECRET_KEY_FRAGMENTS.iter().any(|f| key.contains(f)) {
        return Value::String(MASK.into());
    }

    if key.contains("email") {
        if let Value::String(email) = value {
            let masked = match email.rsplit_once('@') {
                Some((_, domain)) => format!("{MASK}@{domain}"),
                None => MASK.to_string(),
            };
            return Value::String(masked);
        }
    }

    redact(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

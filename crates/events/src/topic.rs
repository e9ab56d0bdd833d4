//! Validated topic names.
//!
//! A [`Topic`] is the only unit of routing on the bus. Names follow the
//! broker naming rules: non-empty, at most [`MAX_TOPIC_LEN`] characters,
//! ASCII letters, digits, `.`, `_` and `-` only.

use std::fmt;

use serde::{Deserialize, Serialize};
use shop_core::TopicPayload;

/// Longest accepted topic name.
pub const MAX_TOPIC_LEN: usize = 249;

/// Reasons a topic name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Topic name must not be empty")]
    Empty,

    #[error("Topic name is {0} characters long, maximum is 249")]
    TooLong(usize),

    #[error("Topic name '{name}' contains invalid character {ch:?}")]
    InvalidChar { name: String, ch: char },
}

/// A validated topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Validate and wrap a topic name.
    pub fn new(name: impl Into<String>) -> Result<Self, TopicError> {
        let name = name.into();

        if name.is_empty() {
            return Err(TopicError::Empty);
        }
        if name.len() > MAX_TOPIC_LEN {
            return Err(TopicError::TooLong(name.len()));
        }
        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(TopicError::InvalidChar { name, ch });
        }

        Ok(Self(name))
    }

    /// The topic a typed payload is bound to.
    ///
    /// Payload topics are compile-time constants in `shop_core::topics`;
    /// an invalid constant is reported the same way as any other name.
    pub fn of<E: TopicPayload>() -> Result<Self, TopicError> {
        Self::new(E::TOPIC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

//! Bus configuration from environment variables.
//!
//! Binaries call `dotenvy::dotenv()` first, then [`BusConfig::from_env`].
//! The `*_with` variants take a lookup function so tests do not have to
//! mutate the process environment.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::broker::{Broker, InMemoryBroker, RemoteBroker};
use crate::connection::{ClientIdentity, ConnectionManager};
use crate::consumer::{ConsumerConfig, FailurePolicy};
use crate::producer::ProducerConfig;
use crate::topic::Topic;

/// Default broker endpoint.
pub const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:9093/ws";

/// URL selecting the process-local broker.
pub const MEMORY_BROKER_URL: &str = "memory://";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read `key` through `lookup`, parsing it as `T`, or return `default`.
pub fn parse_or<T, L>(lookup: &L, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) if value.trim().is_empty() => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

/// Read `key` through `lookup`, or return `default`.
pub fn string_or<L>(lookup: &L, key: &'static str, default: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Lookup backed by the process environment.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ---------------------------------------------------------------------------
// BusConfig
// ---------------------------------------------------------------------------

/// Everything a service needs to join the bus.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub broker_url: String,
    pub service_name: String,
    pub group_id: String,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub fetch_wait: Duration,
    pub fetch_max_records: usize,
    pub handler_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub handler_max_retries: u32,
    pub retry_backoff: Duration,
    pub dead_letter_topic: Option<Topic>,
}

impl BusConfig {
    /// Load bus settings from the environment.
    ///
    /// | Env Var                    | Default                   |
    /// |----------------------------|---------------------------|
    /// | `BROKER_URL`               | `ws://127.0.0.1:9093/ws`  |
    /// | `SERVICE_NAME`             | `default_service`         |
    /// | `GROUP_ID`                 | service name              |
    /// | `CONNECT_TIMEOUT_SECS`     | `10`                      |
    /// | `PUBLISH_TIMEOUT_SECS`     | `5`                       |
    /// | `FETCH_WAIT_MS`            | `500`                     |
    /// | `FETCH_MAX_RECORDS`        | `64`                      |
    /// | `HANDLER_TIMEOUT_SECS`     | `30`                      |
    /// | `SHUTDOWN_TIMEOUT_SECS`    | `10`                      |
    /// | `HANDLER_MAX_RETRIES`      | `0`                       |
    /// | `HANDLER_RETRY_BACKOFF_MS` | `500`                     |
    /// | `DEAD_LETTER_TOPIC`        | unset (no dead-lettering) |
    pub fn from_env(default_service: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(default_service, env_lookup)
    }

    pub fn from_lookup<L>(default_service: &str, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let broker_url = string_or(&lookup, "BROKER_URL", DEFAULT_BROKER_URL);
        if broker_url != MEMORY_BROKER_URL
            && !broker_url.starts_with("ws://")
            && !broker_url.starts_with("wss://")
        {
            return Err(ConfigError::Invalid {
                key: "BROKER_URL",
                value: broker_url,
                reason: "expected memory:// or a ws:// / wss:// URL".into(),
            });
        }

        let service_name = string_or(&lookup, "SERVICE_NAME", default_service);
        let group_id = string_or(&lookup, "GROUP_ID", &service_name);

        let dead_letter_topic = match lookup("DEAD_LETTER_TOPIC").filter(|v| !v.trim().is_empty()) {
            None => None,
            Some(value) => Some(Topic::new(value.trim()).map_err(|e| ConfigError::Invalid {
                key: "DEAD_LETTER_TOPIC",
                value: value.clone(),
                reason: e.to_string(),
            })?),
        };

        Ok(Self {
            broker_url,
            service_name,
            group_id,
            connect_timeout: Duration::from_secs(parse_or(&lookup, "CONNECT_TIMEOUT_SECS", 10)?),
            publish_timeout: Duration::from_secs(parse_or(&lookup, "PUBLISH_TIMEOUT_SECS", 5)?),
            fetch_wait: Duration::from_millis(parse_or(&lookup, "FETCH_WAIT_MS", 500)?),
            fetch_max_records: parse_or(&lookup, "FETCH_MAX_RECORDS", 64)?,
            handler_timeout: Duration::from_secs(parse_or(&lookup, "HANDLER_TIMEOUT_SECS", 30)?),
            shutdown_timeout: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?),
            handler_max_retries: parse_or(&lookup, "HANDLER_MAX_RETRIES", 0)?,
            retry_backoff: Duration::from_millis(parse_or(&lookup, "HANDLER_RETRY_BACKOFF_MS", 500)?),
            dead_letter_topic,
        })
    }

    pub fn client_identity(&self) -> ClientIdentity {
        ClientIdentity::new(self.service_name.clone())
    }

    /// Construct the broker selected by `BROKER_URL`.
    pub fn build_broker(&self) -> Arc<dyn Broker> {
        if self.broker_url == MEMORY_BROKER_URL {
            tracing::warn!("Using the in-process broker; events do not leave this process");
            Arc::new(InMemoryBroker::new())
        } else {
            Arc::new(RemoteBroker::new(self.broker_url.clone()))
        }
    }

    /// Build the connection manager for this service.
    pub fn connection_manager(&self, broker: Arc<dyn Broker>) -> ConnectionManager {
        ConnectionManager::new(self.client_identity(), broker)
            .with_connect_timeout(self.connect_timeout)
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            publish_timeout: self.publish_timeout,
            ..ProducerConfig::default()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            fetch_wait: self.fetch_wait,
            fetch_max_records: self.fetch_max_records,
            handler_timeout: self.handler_timeout,
            shutdown_timeout: self.shutdown_timeout,
            failure_policy: FailurePolicy {
                max_retries: self.handler_max_retries,
                retry_backoff: self.retry_backoff,
                dead_letter_topic: self.dead_letter_topic.clone(),
            },
            ..ConsumerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = BusConfig::from_lookup("email-service", lookup(&[])).unwrap();

        assert_eq!(config.broker_url, DEFAULT_BROKER_URL);
        assert_eq!(config.service_name, "email-service");
        assert_eq!(config.group_id, "email-service");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.fetch_wait, Duration::from_millis(500));
        assert_eq!(config.handler_timeout, Duration::from_secs(30));
        assert_eq!(config.handler_max_retries, 0);
        assert!(config.dead_letter_topic.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = BusConfig::from_lookup(
            "email-service",
            lookup(&[
                ("BROKER_URL", "memory://"),
                ("SERVICE_NAME", "email-1"),
                ("GROUP_ID", "mailers"),
                ("HANDLER_MAX_RETRIES", "2"),
                ("DEAD_LETTER_TOPIC", "mailers.dead-letter"),
            ]),
        )
        .unwrap();

        assert_eq!(config.service_name, "email-1");
        assert_eq!(config.group_id, "mailers");

        let consumer = config.consumer_config();
        assert_eq!(consumer.failure_policy.max_retries, 2);
        assert_eq!(
            consumer.failure_policy.dead_letter_topic.unwrap().as_str(),
            "mailers.dead-letter"
        );
        assert_eq!(config.build_broker().target(), "memory://");
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_matches!(
            BusConfig::from_lookup("x", lookup(&[("FETCH_WAIT_MS", "soon")])),
            Err(ConfigError::Invalid { key: "FETCH_WAIT_MS", .. })
        );
        assert_matches!(
            BusConfig::from_lookup("x", lookup(&[("BROKER_URL", "kafka://localhost")])),
            Err(ConfigError::Invalid { key: "BROKER_URL", .. })
        );
        assert_matches!(
            BusConfig::from_lookup("x", lookup(&[("DEAD_LETTER_TOPIC", "bad topic")])),
            Err(ConfigError::Invalid { key: "DEAD_LETTER_TOPIC", .. })
        );
    }
}

use std::time::Duration;

use shop_events::broker::memory::DEFAULT_MAX_MESSAGE_BYTES;
use shop_events::config::{env_lookup, parse_or, string_or, ConfigError};

/// Broker server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `9093`).
    pub port: u16,
    /// Largest accepted record in bytes (default: 1 MiB).
    pub max_message_bytes: usize,
    /// Period of the ping sweep over client sockets (default: 30 s).
    pub heartbeat_interval: Duration,
}

impl BrokerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var             | Default   |
    /// |---------------------|-----------|
    /// | `HOST`              | `0.0.0.0` |
    /// | `PORT`              | `9093`    |
    /// | `MAX_MESSAGE_BYTES` | `1048576` |
    /// | `HEARTBEAT_INTERVAL_SECS` | `30` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let heartbeat_secs: u64 = parse_or(&lookup, "HEARTBEAT_INTERVAL_SECS", 30)?;
        if heartbeat_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "HEARTBEAT_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            host: string_or(&lookup, "HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 9093)?,
            max_message_bytes: parse_or(&lookup, "MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}

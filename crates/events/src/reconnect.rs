//! Retry pacing for lost broker sessions.
//!
//! [`ReconnectConfig`] describes how long to wait between attempts and
//! [`Backoff`] produces those waits. The retry loop itself is
//! [`ConnectionManager::reconnect`].
//!
//! [`ConnectionManager::reconnect`]: crate::connection::ConnectionManager::reconnect

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait after the first failed attempt. The first attempt is immediate.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per failure. Values below 1 keep the wait constant.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// A fresh sequence of waits, starting at `initial_delay`.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
            multiplier: self.multiplier,
        }
    }
}

/// Endless sequence of waits between reconnect attempts, capped at
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let wait = self.next;
        if self.multiplier.is_finite() && self.multiplier > 1.0 {
            self.next = Duration::try_from_secs_f64(wait.as_secs_f64() * self.multiplier)
                .map_or(self.max, |grown| grown.min(self.max));
        }
        Some(wait)
    }
}

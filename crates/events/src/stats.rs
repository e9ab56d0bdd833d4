//! Consumer group counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated by the pull loop and topic workers.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    handled: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    dropped_no_handler: AtomicU64,
    decode_errors: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`], served by `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Records pulled from the broker.
    pub received: u64,
    /// Handler invocations that succeeded.
    pub handled: u64,
    /// Messages whose handler failed after all attempts.
    pub failed: u64,
    /// Extra attempts made under the retry policy.
    pub retried: u64,
    pub dead_lettered: u64,
    /// Records for a topic with no registered handler.
    pub dropped_no_handler: u64,
    pub decode_errors: u64,
    /// Tasks still running when the shutdown timeout elapsed.
    pub abandoned: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl ConsumerStats {
    pub(crate) fn record_received(&self) {
        bump(&self.received, 1);
    }

    pub(crate) fn record_handled(&self) {
        bump(&self.handled, 1);
    }

    pub(crate) fn record_failed(&self) {
        bump(&self.failed, 1);
    }

    pub(crate) fn record_retry(&self) {
        bump(&self.retried, 1);
    }

    pub(crate) fn record_dead_lettered(&self) {
        bump(&self.dead_lettered, 1);
    }

    pub(crate) fn record_dropped_no_handler(&self) {
        bump(&self.dropped_no_handler, 1);
    }

    pub(crate) fn record_decode_error(&self) {
        bump(&self.decode_errors, 1);
    }

    pub(crate) fn record_abandoned(&self, tasks: u64) {
        bump(&self.abandoned, tasks);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped_no_handler: self.dropped_no_handler.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

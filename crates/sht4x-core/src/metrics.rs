//! Pipeline counters and statistics snapshots.
//!
//! [`Counters`] is owned by the single task that drives the pipeline, so it
//! uses plain integers rather than atomics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Cumulative counters for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Counters {
    messages_sent: u64,
    read_errors: u64,
    started: Instant,
}

impl Counters {
    /// Start counting from now.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Start counting from a specific instant.
    pub fn started_at(started: Instant) -> Self {
        Self {
            messages_sent: 0,
            read_errors: 0,
            started,
        }
    }

    /// Record a published message and return the new total.
    pub fn record_message(&mut self) -> u64 {
        self.messages_sent += 1;
        self.messages_sent
    }

    /// Record a failed read and return the new total.
    pub fn record_error(&mut self) -> u64 {
        self.read_errors += 1;
        self.read_errors
    }

    /// Total messages published.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    /// Total read errors.
    pub fn read_errors(&self) -> u64 {
        self.read_errors
    }

    /// Snapshot using the current time.
    pub fn stats(&self) -> Stats {
        self.stats_at(Instant::now())
    }

    /// Snapshot as of `now`.
    pub fn stats_at(&self, now: Instant) -> Stats {
        Stats::new(
            now.saturating_duration_since(self.started),
            self.messages_sent,
            self.read_errors,
        )
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time statistics for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Seconds since counting started.
    pub uptime_secs: u64,
    /// Total messages published.
    pub messages: u64,
    /// Total read errors.
    pub errors: u64,
    /// Average messages per minute over the uptime.
    pub rate_per_minute: f64,
}

impl Stats {
    /// Build a snapshot and derive the message rate.
    pub fn new(uptime: Duration, messages: u64, errors: u64) -> Self {
        Self {
            uptime_secs: uptime.as_secs(),
            messages,
            errors,
            rate_per_minute: rate_per_minute(messages, uptime),
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime={}s, messages={}, errors={}, rate={:.2}/min",
            self.uptime_secs, self.messages, self.errors, self.rate_per_minute
        )
    }
}

/// Messages per minute over `uptime`.
///
/// Zero when nothing was sent, and zero for a zero uptime.
pub fn rate_per_minute(messages: u64, uptime: Duration) -> f64 {
    let minutes = uptime.as_secs_f64() / 60.0;
    if messages == 0 || minutes <= 0.0 {
        0.0
    } else {
        messages as f64 / minutes
    }
}

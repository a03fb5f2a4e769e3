//! Interval gating for periodic actions.
//!
//! An [`IntervalGate`] answers "has more than `period` elapsed since this gate
//! last fired?". The first query only records a baseline, so a freshly created
//! gate never fires immediately.
//!
//! ```
//! use std::time::Duration;
//! use sht4x_core::IntervalGate;
//! use tokio::time::Instant;
//!
//! let mut gate = IntervalGate::new(Duration::from_secs(60));
//! let start = Instant::now();
//!
//! assert_eq!(gate.elapsed_at(start), Duration::ZERO);
//! assert_eq!(gate.elapsed_at(start + Duration::from_secs(30)), Duration::ZERO);
//! assert_eq!(
//!     gate.elapsed_at(start + Duration::from_secs(61)),
//!     Duration::from_secs(61)
//! );
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Throttle that fires at most once per period.
///
/// Each gate owns its own baseline, so independent timers never interfere.
/// Time comes from [`tokio::time::Instant`], which follows the paused test
/// clock when one is active.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    period: Duration,
    last_fired: Option<Instant>,
}

impl IntervalGate {
    /// Create a gate that has never fired.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_fired: None,
        }
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Query the gate using the current time.
    pub fn elapsed(&mut self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    /// Query the gate at `now`.
    ///
    /// Returns the time since the last baseline if it exceeds the period and
    /// moves the baseline to `now`; returns zero otherwise. The first call
    /// only records the baseline.
    pub fn elapsed_at(&mut self, now: Instant) -> Duration {
        let Some(last) = self.last_fired else {
            self.last_fired = Some(now);
            return Duration::ZERO;
        };

        let since = now.saturating_duration_since(last);
        if since > self.period {
            self.last_fired = Some(now);
            since
        } else {
            Duration::ZERO
        }
    }

    /// Convenience wrapper returning whether the gate fired.
    pub fn is_due(&mut self) -> bool {
        !self.elapsed().is_zero()
    }
}

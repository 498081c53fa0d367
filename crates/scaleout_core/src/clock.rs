//! Pluggable time sources.
//!
//! Every time-dependent decision in the routing core (heartbeat expiry,
//! heartbeat scheduling, termination timestamps) reads the current instant
//! through the [`Clock`] trait. Production wiring uses [`SystemClock`];
//! tests and simulations use [`ManualClock`], which only moves when told to
//! and therefore lets expiry scenarios run instantly.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Source of the current instant.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant in UTC.
    fn instant(&self) -> DateTime<Utc>;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock that only advances when asked to.
///
/// Shared between the gateway, the shards and the test body behind an
/// `Arc`, so every participant observes the same simulated instant.
///
/// # Examples
///
/// ```rust
/// use chrono::{Duration, TimeZone, Utc};
/// use scaleout_core::clock::{Clock, ManualClock};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let clock = ManualClock::new(start);
/// clock.advance_seconds(10);
/// assert_eq!(clock.instant(), start + Duration::seconds(10));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Moves the clock forward by `delta`.
    ///
    /// Negative deltas are ignored; simulated time never runs backwards.
    pub fn advance(&self, delta: Duration) {
        if delta <= Duration::zero() {
            return;
        }
        let mut current = self.current.lock();
        *current += delta;
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_seconds(&self, seconds: i64) {
        self.advance(Duration::seconds(seconds));
    }
}

impl Clock for ManualClock {
    fn instant(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

//! Clocks and instants.
//!
//! The timer state and the activity monitor are generic over a [`Clock`] so
//! they can run against wall-clock time in the daemon, tokio's (pausable)
//! monotonic time in tests, or a fully manual clock.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Sleep;

/// Fallback offset when advancing an instant would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A point in time produced by a [`Clock`].
pub trait ClockInstant: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    /// Returns the instant `by` later, saturating instead of overflowing.
    fn advanced(self, by: Duration) -> Self;

    /// Returns the instant `by` earlier, saturating instead of overflowing.
    fn retreated(self, by: Duration) -> Self;

    /// Elapsed time from `self` to `later`, or zero if `later` is earlier.
    fn duration_to(self, later: Self) -> Duration;
}

impl ClockInstant for DateTime<Utc> {
    fn advanced(self, by: Duration) -> Self {
        TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| self.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn retreated(self, by: Duration) -> Self {
        TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| self.checked_sub_signed(delta))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn duration_to(self, later: Self) -> Duration {
        (later - self).to_std().unwrap_or(Duration::ZERO)
    }
}

impl ClockInstant for tokio::time::Instant {
    fn advanced(self, by: Duration) -> Self {
        self.checked_add(by)
            .or_else(|| self.checked_add(FAR_FUTURE))
            .unwrap_or(self)
    }

    fn retreated(self, by: Duration) -> Self {
        self.checked_sub(by).unwrap_or(self)
    }

    fn duration_to(self, later: Self) -> Duration {
        later.saturating_duration_since(self)
    }
}

/// Source of the current instant plus the ability to sleep until one.
pub trait Clock: Clone + Send + Sync + 'static {
    type Instant: ClockInstant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// A future that completes once `deadline` is reached.
    ///
    /// The default implementation converts the deadline into a relative tokio
    /// sleep, so the wait is measured on tokio's monotonic timer.
    fn sleep_until(&self, deadline: Self::Instant) -> Sleep {
        tokio::time::sleep(self.now().duration_to(deadline))
    }
}

/// Wall-clock time. Keeps advancing while the host is suspended and can be
/// serialized, which is what the daemon persists in its state snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcClock;

impl Clock for UtcClock {
    type Instant = DateTime<Utc>;

    fn now(&self) -> Self::Instant {
        Utc::now()
    }
}

/// Tokio's monotonic clock. On Linux and macOS this does not advance while
/// the host is suspended, and it follows `tokio::time::pause` in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep_until(&self, deadline: Self::Instant) -> Sleep {
        tokio::time::sleep_until(deadline)
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a manual clock frozen at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Create a manual clock frozen at `instant`.
    pub fn starting_at(instant: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(instant)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.advanced(by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    type Instant = DateTime<Utc>;

    fn now(&self) -> Self::Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

//! Suspending clock drift detection.
//!
//! A continuous clock keeps advancing while the host is asleep, a suspending
//! clock does not. When the gap between their elapsed times grows past a
//! threshold, the host slept without the monitor being told.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockInstant};

/// Object-safe view of a drift gauge, as held by the activity monitor.
pub trait SuspendDrift: Send {
    /// Measure drift since the last reset. Returns the drift once it exceeds
    /// the threshold, and resets the marks when it does.
    fn check(&mut self) -> Option<Duration>;
}

/// Compares elapsed time on a continuous clock `K` and a suspending clock `S`.
pub struct ClockDrift<K: Clock, S: Clock> {
    continuous: K,
    suspending: S,
    marks: (K::Instant, S::Instant),
    threshold: Duration,
}

impl<K: Clock, S: Clock> ClockDrift<K, S> {
    pub fn new(continuous: K, suspending: S, threshold: Duration) -> Self {
        let marks = (continuous.now(), suspending.now());
        Self {
            continuous,
            suspending,
            marks,
            threshold,
        }
    }

    /// Drift accumulated since the marks were last reset.
    pub fn drift(&self) -> Duration {
        let continuous = self.marks.0.duration_to(self.continuous.now());
        let suspending = self.marks.1.duration_to(self.suspending.now());
        if suspending > continuous + Duration::from_millis(1) {
            warn!(
                "Suspending clock running ahead of continuous clock by {:?}",
                suspending - continuous
            );
        }
        let drift = continuous.saturating_sub(suspending);
        debug!(
            "continuous {:?} - suspending {:?} = drift {:?}",
            continuous, suspending, drift
        );
        drift
    }

    /// Restart measuring from now.
    pub fn reset(&mut self) {
        self.marks = (self.continuous.now(), self.suspending.now());
    }
}

impl<K: Clock, S: Clock> SuspendDrift for ClockDrift<K, S> {
    fn check(&mut self) -> Option<Duration> {
        let drift = self.drift();
        if drift > self.threshold {
            info!("Exceeded max suspending clock drift: {:?}", drift);
            self.reset();
            Some(drift)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn gauge() -> (ManualClock, ManualClock, ClockDrift<ManualClock, ManualClock>) {
        let continuous = ManualClock::new();
        let suspending = ManualClock::new();
        let drift = ClockDrift::new(continuous.clone(), suspending.clone(), Duration::from_secs(10));
        (continuous, suspending, drift)
    }

    #[test]
    fn clocks_in_step_have_no_drift() {
        let (continuous, suspending, mut drift) = gauge();
        continuous.advance(Duration::from_secs(600));
        suspending.advance(Duration::from_secs(600));

        assert_eq!(drift.drift(), Duration::ZERO);
        assert_eq!(drift.check(), None);
    }

    #[test]
    fn missed_sleep_exceeds_threshold() {
        let (continuous, suspending, mut drift) = gauge();
        continuous.advance(Duration::from_secs(600));
        suspending.advance(Duration::from_secs(30));

        assert_eq!(drift.check(), Some(Duration::from_secs(570)));
        // marks were reset
        assert_eq!(drift.drift(), Duration::ZERO);
    }

    #[test]
    fn small_drift_accumulates_until_threshold() {
        let (continuous, suspending, mut drift) = gauge();
        for _ in 0..2 {
            continuous.advance(Duration::from_secs(65));
            suspending.advance(Duration::from_secs(60));
            assert_eq!(drift.check(), None);
        }

        continuous.advance(Duration::from_secs(65));
        suspending.advance(Duration::from_secs(60));
        assert_eq!(drift.check(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn suspending_ahead_reads_as_zero() {
        let (continuous, suspending, drift) = gauge();
        continuous.advance(Duration::from_secs(1));
        suspending.advance(Duration::from_secs(5));

        assert_eq!(drift.drift(), Duration::ZERO);
    }
}

//! Idle / active / grace timer state.
//!
//! ```text
//!              activate()                      activate_for(grace)
//!   Idle ───────────────────► Active ─────────────────────────────► Grace
//!    ▲                          │  ▲                                  │
//!    │       deactivate()       │  │   activate() before expiry       │
//!    └──────────────────────────┘  └──────────────────────────────────┘
//!    ▲                                                                │
//!    └──────────────── expiry reached (read as idle) ─────────────────┘
//! ```
//!
//! A [`TimerState`] never does I/O. Every query is evaluated against the
//! clock's current instant, so a grace period lapses on its own without any
//! mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::clock::{Clock, ClockInstant};

/// The raw variant of a timer, without a clock attached.
///
/// This is also the persisted form of the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum TimerSnapshot<I> {
    /// No valid start.
    Idle,
    /// Started at `start`, valid only while `now < expires`.
    Grace { start: I, expires: I },
    /// Started at `start`, no expiration.
    Active { start: I },
}

/// Timer state bound to a clock.
#[derive(Clone)]
pub struct TimerState<C: Clock> {
    clock: C,
    state: TimerSnapshot<C::Instant>,
}

impl<C: Clock> TimerState<C> {
    /// Initializes the timer in idle state.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            state: TimerSnapshot::Idle,
        }
    }

    /// Initializes the timer as active since `start`.
    ///
    /// `start` must not be in the future. Release builds clamp it to now.
    pub fn since(start: C::Instant, clock: C) -> Self {
        let start = clamp_start(start, clock.now());
        Self {
            clock,
            state: TimerSnapshot::Active { start },
        }
    }

    /// Initializes the timer as active since `start` until `expires`.
    ///
    /// `expires` should be in the future. If it is not, the grace period is
    /// already lapsed and the timer reads as idle.
    pub fn since_until(start: C::Instant, expires: C::Instant, clock: C) -> Self {
        let now = clock.now();
        debug_assert!(expires > now, "expires should be in the future");
        let start = clamp_start(start, now);
        Self {
            clock,
            state: TimerSnapshot::Grace { start, expires },
        }
    }

    /// Rebuild a timer from a snapshot taken earlier, possibly by another
    /// process. Lapsed grace periods stay lapsed; future starts are clamped.
    pub fn restore(snapshot: TimerSnapshot<C::Instant>, clock: C) -> Self {
        let now = clock.now();
        let state = match snapshot {
            TimerSnapshot::Idle => TimerSnapshot::Idle,
            TimerSnapshot::Active { start } => TimerSnapshot::Active {
                start: start.min(now),
            },
            TimerSnapshot::Grace { start, expires } => TimerSnapshot::Grace {
                start: start.min(now),
                expires,
            },
        };
        Self { clock, state }
    }

    /// The raw variant, for persistence or comparison.
    pub fn snapshot(&self) -> TimerSnapshot<C::Instant> {
        self.state
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Check if the timer is active.
    pub fn is_active(&self) -> bool {
        match self.state {
            TimerSnapshot::Idle => false,
            TimerSnapshot::Grace { expires, .. } => self.clock.now() < expires,
            TimerSnapshot::Active { .. } => true,
        }
    }

    /// Check if the timer is idle.
    pub fn is_idle(&self) -> bool {
        !self.is_active()
    }

    /// Check if the timer has an expiration, regardless of it being lapsed.
    pub fn has_expiration(&self) -> bool {
        matches!(self.state, TimerSnapshot::Grace { .. })
    }

    /// Valid start instant. `None` if idle or the grace period has lapsed.
    pub fn start(&self) -> Option<C::Instant> {
        match self.state {
            TimerSnapshot::Idle => None,
            TimerSnapshot::Grace { start, expires } => (self.clock.now() < expires).then_some(start),
            TimerSnapshot::Active { start } => Some(start),
        }
    }

    /// Valid expiration instant. `None` unless in a grace period that has not lapsed.
    pub fn expires(&self) -> Option<C::Instant> {
        match self.state {
            TimerSnapshot::Grace { expires, .. } => (self.clock.now() < expires).then_some(expires),
            TimerSnapshot::Idle | TimerSnapshot::Active { .. } => None,
        }
    }

    /// How long the timer has been running at `end`, or zero if idle.
    pub fn duration_to(&self, end: C::Instant) -> Duration {
        self.start()
            .map(|start| start.duration_to(end))
            .unwrap_or(Duration::ZERO)
    }

    /// Regardless of state, put the timer in idle.
    pub fn deactivate(&mut self) {
        self.state = TimerSnapshot::Idle;
    }

    /// Activate the timer if it is idle or lapsed. Otherwise keep the current start.
    pub fn activate(&mut self) {
        let now = self.clock.now();
        self.state = match self.state {
            TimerSnapshot::Idle => TimerSnapshot::Active { start: now },
            TimerSnapshot::Grace { start, expires } => TimerSnapshot::Active {
                start: if now < expires { start } else { now },
            },
            active @ TimerSnapshot::Active { .. } => active,
        };
    }

    /// Keep the timer active until `expires`.
    ///
    /// The earliest still-valid start is preserved; a lapsed grace period
    /// starts fresh. A non-future `expires` leaves the timer lapsed.
    pub fn activate_until(&mut self, expires: C::Instant) {
        let now = self.clock.now();
        debug_assert!(expires > now, "expires should be in the future");
        let start = match self.state {
            TimerSnapshot::Idle => now,
            TimerSnapshot::Grace {
                start,
                expires: previous,
            } => {
                if now < previous {
                    start
                } else {
                    now
                }
            }
            TimerSnapshot::Active { start } => start,
        };
        self.state = TimerSnapshot::Grace { start, expires };
    }

    /// Keep the timer active for `duration` from now.
    pub fn activate_for(&mut self, duration: Duration) {
        debug_assert!(duration > Duration::ZERO, "duration should be positive");
        let expires = self.clock.now().advanced(duration);
        self.activate_until(expires);
    }

    /// Start over from now, discarding any previous start.
    pub fn restart(&mut self) {
        self.state = TimerSnapshot::Active {
            start: self.clock.now(),
        };
    }
}

fn clamp_start<I: ClockInstant>(start: I, now: I) -> I {
    debug_assert!(start <= now, "start should be now or in the past");
    start.min(now)
}

impl<C: Clock> PartialEq for TimerState<C> {
    fn eq(&self, other: &Self) -> bool {
        self.state == other.state
    }
}

impl<C: Clock> Eq for TimerState<C> {}

impl<C: Clock> fmt::Debug for TimerState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TimerState").field(&self.state).finish()
    }
}

impl<C: Clock> fmt::Display for TimerState<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = self.clock.now();
        match self.state {
            TimerSnapshot::Idle => write!(f, "idle"),
            TimerSnapshot::Grace { start, expires } if now < expires => write!(
                f,
                "active[{}, expires in {}]",
                Hms(start.duration_to(now)),
                Hms(now.duration_to(expires))
            ),
            TimerSnapshot::Grace { .. } => write!(f, "idle[expired]"),
            TimerSnapshot::Active { start } => write!(f, "active[{}]", Hms(start.duration_to(now))),
        }
    }
}

/// `H:MM:SS`, hours unpadded.
struct Hms(Duration);

impl fmt::Display for Hms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        write!(f, "{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn is_active() {
        let clock = ManualClock::new();
        let start = clock.now().retreated(secs(30));

        assert!(!TimerState::new(clock.clone()).is_active());
        assert!(TimerState::since(start, clock.clone()).is_active());
        assert!(TimerState::since_until(start, clock.now().advanced(secs(150)), clock.clone()).is_active());

        let timer = TimerState::since_until(start, clock.now().advanced(secs(30)), clock.clone());
        clock.advance(secs(60));
        assert!(!timer.is_active());
        assert!(timer.is_idle());
    }

    #[test]
    fn start_and_expires() {
        let clock = ManualClock::new();
        let start = clock.now().retreated(secs(30));
        let expires = clock.now().advanced(secs(150));

        let idle = TimerState::new(clock.clone());
        assert_eq!(idle.start(), None);
        assert_eq!(idle.expires(), None);

        let active = TimerState::since(start, clock.clone());
        assert_eq!(active.start(), Some(start));
        assert_eq!(active.expires(), None);

        let grace = TimerState::since_until(start, expires, clock.clone());
        assert_eq!(grace.start(), Some(start));
        assert_eq!(grace.expires(), Some(expires));

        let lapsing = TimerState::since_until(start, clock.now().advanced(secs(30)), clock.clone());
        clock.advance(secs(60));
        assert_eq!(lapsing.start(), None);
        assert_eq!(lapsing.expires(), None);
        assert!(lapsing.has_expiration());
    }

    #[test]
    fn duration_is_elapsed_since_start() {
        let clock = ManualClock::new();
        let now = clock.now();
        for offset in [0, 1, 59, 3_600, 86_400] {
            let start = now.retreated(secs(offset));
            let timer = TimerState::since(start, clock.clone());
            assert_eq!(timer.duration_to(now), secs(offset));
        }

        assert_eq!(TimerState::new(clock.clone()).duration_to(now), Duration::ZERO);
    }

    #[test]
    fn duration_of_lapsed_grace_is_zero() {
        let clock = ManualClock::new();
        let start = clock.now().retreated(secs(30));
        let timer = TimerState::since_until(start, clock.now().advanced(secs(30)), clock.clone());
        assert_eq!(timer.duration_to(clock.now()), secs(30));

        clock.advance(secs(60));
        assert_eq!(timer.duration_to(clock.now()), Duration::ZERO);
    }

    #[test]
    fn deactivate_is_unconditional() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timers = vec![
            TimerState::new(clock.clone()),
            TimerState::since(long_ago, clock.clone()),
            TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone()),
        ];
        for timer in &mut timers {
            timer.deactivate();
            assert_eq!(timer.to_string(), "idle");
        }
    }

    #[test]
    fn activate_keeps_existing_start() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::new(clock.clone());
        timer.activate();
        assert_eq!(timer.start(), Some(clock.now()));
        assert_eq!(timer.to_string(), "active[0:00:00]");

        let mut timer = TimerState::since(long_ago, clock.clone());
        timer.activate();
        timer.activate();
        assert_eq!(timer.start(), Some(long_ago));
        assert_eq!(timer.to_string(), "active[0:05:00]");

        let mut timer = TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone());
        timer.activate();
        assert_eq!(timer.to_string(), "active[0:05:00]");
        assert!(!timer.has_expiration());
    }

    #[test]
    fn activate_after_lapse_starts_fresh() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone());
        clock.advance(secs(60));
        timer.activate();
        assert_eq!(timer.start(), Some(clock.now()));
        assert_eq!(timer.to_string(), "active[0:00:00]");
    }

    #[test]
    fn deactivate_then_activate_forgets_previous_start() {
        let clock = ManualClock::new();
        let mut timer = TimerState::since(clock.now().retreated(secs(300)), clock.clone());

        timer.deactivate();
        clock.advance(secs(10));
        timer.activate();
        assert_eq!(timer.start(), Some(clock.now()));
    }

    #[test]
    fn activate_until() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::new(clock.clone());
        timer.activate_until(clock.now().advanced(secs(60)));
        assert_eq!(timer.to_string(), "active[0:00:00, expires in 0:01:00]");

        let mut timer = TimerState::since(long_ago, clock.clone());
        timer.activate_until(clock.now().advanced(secs(60)));
        assert_eq!(timer.to_string(), "active[0:05:00, expires in 0:01:00]");

        let mut timer = TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone());
        timer.activate_until(clock.now().advanced(secs(60)));
        assert_eq!(timer.to_string(), "active[0:05:00, expires in 0:01:00]");
    }

    #[test]
    fn activate_until_twice_preserves_start() {
        let clock = ManualClock::new();
        let mut timer = TimerState::new(clock.clone());
        let first = clock.now();

        timer.activate_until(clock.now().advanced(secs(60)));
        clock.advance(secs(20));
        timer.activate_until(clock.now().advanced(secs(60)));

        assert_eq!(timer.start(), Some(first));
        assert_eq!(timer.expires(), Some(clock.now().advanced(secs(60))));
    }

    #[test]
    fn activate_until_after_lapse_starts_fresh() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone());
        clock.advance(secs(60));
        timer.activate_until(clock.now().advanced(secs(60)));
        assert_eq!(timer.start(), Some(clock.now()));
        assert_eq!(timer.to_string(), "active[0:00:00, expires in 0:01:00]");
    }

    #[test]
    fn activate_for() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::new(clock.clone());
        timer.activate_for(secs(60));
        assert_eq!(timer.to_string(), "active[0:00:00, expires in 0:01:00]");

        let mut timer = TimerState::since(long_ago, clock.clone());
        timer.activate_for(secs(60));
        assert_eq!(timer.to_string(), "active[0:05:00, expires in 0:01:00]");
    }

    #[test]
    fn restart_discards_start() {
        let clock = ManualClock::new();
        let long_ago = clock.now().retreated(secs(300));

        let mut timer = TimerState::since(long_ago, clock.clone());
        timer.restart();
        assert_eq!(timer.to_string(), "active[0:00:00]");

        let mut timer = TimerState::since_until(long_ago, clock.now().advanced(secs(30)), clock.clone());
        timer.restart();
        assert_eq!(timer.to_string(), "active[0:00:00]");
        assert!(!timer.has_expiration());
    }

    #[test]
    fn grace_description_expires() {
        let clock = ManualClock::new();
        let timer = TimerState::since_until(
            clock.now().retreated(secs(300)),
            clock.now().advanced(secs(30)),
            clock.clone(),
        );
        assert_eq!(timer.to_string(), "active[0:05:00, expires in 0:00:30]");

        clock.advance(secs(60));
        assert!(timer.is_idle());
        assert_eq!(timer.to_string(), "idle[expired]");
    }

    #[test]
    fn equality_ignores_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        let a = TimerState::since_until(start, start.advanced(secs(30)), clock.clone());
        let b = a.clone();

        clock.advance(secs(60));
        assert_eq!(a, b);
        assert_ne!(a, TimerState::new(clock.clone()));
    }

    #[test]
    fn snapshot_serializes_tagged() {
        let clock = ManualClock::new();
        let timer = TimerState::new(clock.clone());
        let json = serde_json::to_string(&timer.snapshot()).unwrap();
        assert_eq!(json, r#"{"state":"idle"}"#);

        let timer = TimerState::since(clock.now(), clock.clone());
        let value = serde_json::to_value(timer.snapshot()).unwrap();
        assert_eq!(value["state"], "active");
        assert!(value["start"].is_string());
    }

    #[test]
    fn restore_clamps_future_start() {
        let clock = ManualClock::new();
        let future = clock.now().advanced(secs(60));
        let timer = TimerState::restore(TimerSnapshot::Active { start: future }, clock.clone());
        assert_eq!(timer.start(), Some(clock.now()));
    }

    #[test]
    fn restore_keeps_lapsed_grace_lapsed() {
        let clock = ManualClock::new();
        let start = clock.now().retreated(secs(600));
        let expires = clock.now().retreated(secs(60));
        let timer = TimerState::restore(TimerSnapshot::Grace { start, expires }, clock.clone());
        assert!(timer.is_idle());
        assert!(timer.has_expiration());
    }
}

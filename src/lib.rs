//! Aware - activity timer
//!
//! Tracks how long the user has been continuously active. The timer starts on
//! activity, stops after a period without input or when the host sleeps, and
//! survives short interruptions (backgrounding, locking) through grace
//! periods. One monitor task owns the timer; everything else observes it.

pub mod background;
pub mod clock;
pub mod config;
pub mod drift;
pub mod idle;
pub mod monitor;
pub mod notifications;
pub mod power;
pub mod snapshot;
pub mod timer;

pub use clock::{Clock, ClockInstant, ManualClock, MonotonicClock, UtcClock};
pub use monitor::{ActivityMonitor, MonitorConfig, MonitorHandle, Sources, StateUpdates};
pub use notifications::{NotificationCenter, PowerEvent};
pub use timer::{TimerSnapshot, TimerState};

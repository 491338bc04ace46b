//! Input activity and display power probes with platform-specific implementations.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::monitor::{DisplayPower, InputActivity, Sources};

/// Default interval between idle counter reads while waiting for input.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A system-wide "time since last input" counter.
pub trait IdleCounter: Send {
    /// Current idle time, or `None` if the counter could not be read.
    fn idle_time(&self) -> Option<Duration>;
}

/// Input probe over an [`IdleCounter`].
///
/// No platform offers a portable "next input event" hook, so the wait polls
/// the counter and completes once it drops below the poll interval.
pub struct PollingInput<Q> {
    counter: Q,
    poll_interval: Duration,
}

impl<Q: IdleCounter> PollingInput<Q> {
    pub fn new(counter: Q, poll_interval: Duration) -> Self {
        Self {
            counter,
            poll_interval,
        }
    }
}

#[async_trait]
impl<Q: IdleCounter + 'static> InputActivity for PollingInput<Q> {
    fn since_last_event(&self) -> Duration {
        self.counter.idle_time().unwrap_or_else(|| {
            warn!("Failed to query idle time");
            Duration::ZERO
        })
    }

    async fn next_event(&mut self) {
        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.counter.idle_time() {
                Some(idle_time) if idle_time < self.poll_interval => {
                    debug!("Input seen {:?} ago", idle_time);
                    return;
                }
                Some(_) => {}
                None => warn!("Failed to query idle time"),
            }
        }
    }
}

/// Display probe for hosts that cannot report display power.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwakeDisplay;

impl DisplayPower for AwakeDisplay {
    fn is_main_display_asleep(&self) -> bool {
        false
    }
}

/// Counter for hosts without an idle counter. Reports constant activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCounter;

impl IdleCounter for NoCounter {
    fn idle_time(&self) -> Option<Duration> {
        Some(Duration::ZERO)
    }
}

/// Desktop sources for the current platform.
#[cfg(target_os = "linux")]
pub fn desktop_sources(poll_interval: Duration) -> Result<Sources> {
    let session = linux::X11Session::connect()?;
    Ok(Sources::desktop(
        PollingInput::new(session.clone(), poll_interval),
        session,
    ))
}

/// Desktop sources for the current platform.
#[cfg(target_os = "macos")]
pub fn desktop_sources(poll_interval: Duration) -> Result<Sources> {
    Ok(Sources::desktop(
        PollingInput::new(macos::HidIdle, poll_interval),
        macos::MainDisplay,
    ))
}

/// Desktop sources for the current platform.
#[cfg(target_os = "windows")]
pub fn desktop_sources(poll_interval: Duration) -> Result<Sources> {
    Ok(Sources::desktop(
        PollingInput::new(windows::LastInput, poll_interval),
        AwakeDisplay,
    ))
}

/// Desktop sources for the current platform.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn desktop_sources(poll_interval: Duration) -> Result<Sources> {
    warn!("No idle counter on this platform, the user always counts as active");
    Ok(Sources::desktop(
        PollingInput::new(NoCounter, poll_interval),
        AwakeDisplay,
    ))
}

/// Main display probe for the current platform.
#[cfg(target_os = "linux")]
pub fn main_display() -> Result<Box<dyn DisplayPower>> {
    Ok(Box::new(linux::X11Session::connect()?))
}

/// Main display probe for the current platform.
#[cfg(target_os = "macos")]
pub fn main_display() -> Result<Box<dyn DisplayPower>> {
    Ok(Box::new(macos::MainDisplay))
}

/// Main display probe for the current platform.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn main_display() -> Result<Box<dyn DisplayPower>> {
    Ok(Box::new(AwakeDisplay))
}

//! Platform event sources that feed the notification center on desktop hosts.
//!
//! No desktop platform hands us sleep/wake callbacks without a native run
//! loop, so these watchers derive the events by polling: a resume shows up as
//! a jump between the wall clock and the monotonic clock, and display power
//! changes show up as edges of the display probe.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::drift::{ClockDrift, SuspendDrift};
use crate::monitor::DisplayPower;
use crate::notifications::{NotificationCenter, PowerEvent};

/// Post [`PowerEvent::DidWake`] whenever the host resumed since the last tick.
///
/// The gauge is reset every tick, so only a jump within one tick counts.
pub async fn watch_resume<K: Clock, S: Clock>(
    center: NotificationCenter,
    mut drift: ClockDrift<K, S>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("Watching for resume every {:?}", tick);

    loop {
        interval.tick().await;
        match drift.check() {
            Some(asleep) => {
                info!("Host resumed after about {:?} asleep", asleep);
                center.post(PowerEvent::DidWake, ());
            }
            None => drift.reset(),
        }
    }
}

/// Post screen sleep and wake events on edges of the main display's power state.
pub async fn watch_display(center: NotificationCenter, display: Box<dyn DisplayPower>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut asleep = display.is_main_display_asleep();
    debug!("Main display asleep: {}", asleep);

    loop {
        interval.tick().await;
        let now_asleep = display.is_main_display_asleep();
        if now_asleep == asleep {
            continue;
        }

        asleep = now_asleep;
        center.post(
            if asleep {
                PowerEvent::ScreensDidSleep
            } else {
                PowerEvent::ScreensDidWake
            },
            (),
        );
    }
}

/// Completes on SIGINT or SIGTERM (Ctrl+C only off Unix).
pub async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")?;
        info!("Received shutdown signal, shutting down");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::time;

    #[derive(Clone, Default)]
    struct Switch(Arc<AtomicBool>);

    impl DisplayPower for Switch {
        fn is_main_display_asleep(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn resume_posts_did_wake() {
        let center = NotificationCenter::default();
        let mut merged = center.merge(&PowerEvent::DESKTOP);
        let wall = ManualClock::new();
        let monotonic = ManualClock::new();
        let drift = ClockDrift::new(wall.clone(), monotonic.clone(), Duration::from_secs(10));
        let watcher = tokio::spawn(watch_resume(center.clone(), drift, Duration::from_secs(5)));

        // a quiet tick with ordinary skew
        wall.advance(Duration::from_secs(5));
        monotonic.advance(Duration::from_secs(4));
        time::sleep(Duration::from_secs(6)).await;

        wall.advance(Duration::from_secs(3_600));
        monotonic.advance(Duration::from_secs(5));
        let notification = merged.recv().await.unwrap();
        assert_eq!(notification.event, PowerEvent::DidWake);

        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn small_skew_never_accumulates() {
        let center = NotificationCenter::default();
        let mut merged = center.merge(&PowerEvent::DESKTOP);
        let wall = ManualClock::new();
        let monotonic = ManualClock::new();
        let drift = ClockDrift::new(wall.clone(), monotonic.clone(), Duration::from_secs(10));
        let watcher = tokio::spawn(watch_resume(center.clone(), drift, Duration::from_secs(5)));

        for _ in 0..20 {
            wall.advance(Duration::from_secs(6));
            monotonic.advance(Duration::from_secs(5));
            time::sleep(Duration::from_secs(5)).await;
        }

        assert!(time::timeout(Duration::from_millis(1), merged.recv()).await.is_err());
        watcher.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn display_edges_become_notifications() {
        let center = NotificationCenter::default();
        let mut merged = center.merge(&PowerEvent::DESKTOP);
        let display = Switch::default();
        let watcher = tokio::spawn(watch_display(
            center.clone(),
            Box::new(display.clone()),
            Duration::from_secs(1),
        ));

        time::sleep(Duration::from_secs(3)).await;
        display.0.store(true, Ordering::SeqCst);
        assert_eq!(merged.recv().await.unwrap().event, PowerEvent::ScreensDidSleep);

        display.0.store(false, Ordering::SeqCst);
        assert_eq!(merged.recv().await.unwrap().event, PowerEvent::ScreensDidWake);

        watcher.abort();
    }
}

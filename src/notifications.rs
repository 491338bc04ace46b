//! Power and lifecycle notifications, merged into one ordered stream.
//!
//! Event sources post into a [`NotificationCenter`]. The monitor consumes a
//! [`MergedNotifications`] filtered to the events it cares about. The buffer
//! is bounded and keeps the newest items: a consumer that falls behind skips
//! the oldest ones, which is fine because every event can be re-derived from
//! the current power and lifecycle state.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default number of notifications buffered per subscriber.
pub const DEFAULT_BUFFER: usize = 7;

/// The closed vocabulary of power and lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerEvent {
    /// The host is about to sleep.
    WillSleep,
    /// The host woke from sleep.
    DidWake,
    /// The displays went to sleep.
    ScreensDidSleep,
    /// The displays woke up.
    ScreensDidWake,
    /// The host is shutting down or logging out.
    WillPowerOff,
    /// The application moved to the background.
    DidEnterBackground,
    /// The application is returning to the foreground.
    WillEnterForeground,
    /// The device was unlocked.
    ProtectedDataAvailable,
    /// The device is about to lock.
    ProtectedDataUnavailable,
    /// A scheduled background task was launched.
    BackgroundRefresh,
}

impl PowerEvent {
    /// Events posted by desktop hosts.
    pub const DESKTOP: [PowerEvent; 5] = [
        PowerEvent::WillSleep,
        PowerEvent::DidWake,
        PowerEvent::ScreensDidSleep,
        PowerEvent::ScreensDidWake,
        PowerEvent::WillPowerOff,
    ];

    /// Events posted by suspendable, lockable application hosts.
    pub const MOBILE: [PowerEvent; 5] = [
        PowerEvent::DidEnterBackground,
        PowerEvent::WillEnterForeground,
        PowerEvent::ProtectedDataAvailable,
        PowerEvent::ProtectedDataUnavailable,
        PowerEvent::BackgroundRefresh,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PowerEvent::WillSleep => "will-sleep",
            PowerEvent::DidWake => "did-wake",
            PowerEvent::ScreensDidSleep => "screens-did-sleep",
            PowerEvent::ScreensDidWake => "screens-did-wake",
            PowerEvent::WillPowerOff => "will-power-off",
            PowerEvent::DidEnterBackground => "did-enter-background",
            PowerEvent::WillEnterForeground => "will-enter-foreground",
            PowerEvent::ProtectedDataAvailable => "protected-data-available",
            PowerEvent::ProtectedDataUnavailable => "protected-data-unavailable",
            PowerEvent::BackgroundRefresh => "background-refresh",
        }
    }
}

impl fmt::Display for PowerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown power event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for PowerEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event = match s {
            "will-sleep" => PowerEvent::WillSleep,
            "did-wake" => PowerEvent::DidWake,
            "screens-did-sleep" | "screens-will-sleep" => PowerEvent::ScreensDidSleep,
            "screens-did-wake" => PowerEvent::ScreensDidWake,
            "will-power-off" => PowerEvent::WillPowerOff,
            "did-enter-background" => PowerEvent::DidEnterBackground,
            "will-enter-foreground" => PowerEvent::WillEnterForeground,
            "protected-data-available" => PowerEvent::ProtectedDataAvailable,
            "protected-data-unavailable" => PowerEvent::ProtectedDataUnavailable,
            "background-refresh" => PowerEvent::BackgroundRefresh,
            other => return Err(UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

/// A posted event with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification<P = ()> {
    pub event: PowerEvent,
    pub payload: P,
}

/// Fan-in point for every event source. Cheap to clone; clones post into
/// the same stream.
#[derive(Debug, Clone)]
pub struct NotificationCenter<P = ()> {
    tx: broadcast::Sender<Notification<P>>,
}

impl<P: Clone + Send + 'static> NotificationCenter<P> {
    /// Create a center that buffers up to `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Post an event. Nobody listening is not an error.
    pub fn post(&self, event: PowerEvent, payload: P) {
        debug!("Posting {}", event);
        let _ = self.tx.send(Notification { event, payload });
    }

    /// Subscribe to `events`, merged in posting order.
    ///
    /// Only notifications posted after this call are delivered.
    pub fn merge(&self, events: &[PowerEvent]) -> MergedNotifications<P> {
        MergedNotifications {
            rx: self.tx.subscribe(),
            events: events.to_vec(),
        }
    }
}

impl<P: Clone + Send + 'static> Default for NotificationCenter<P> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

/// One consumer's view of a [`NotificationCenter`].
#[derive(Debug)]
pub struct MergedNotifications<P = ()> {
    rx: broadcast::Receiver<Notification<P>>,
    events: Vec<PowerEvent>,
}

impl<P: Clone + Send + 'static> MergedNotifications<P> {
    /// The next matching notification, or `None` once every poster is gone.
    pub async fn recv(&mut self) -> Option<Notification<P>> {
        loop {
            match self.rx.recv().await {
                Ok(notification) if self.events.contains(&notification.event) => {
                    return Some(notification)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} oldest notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[test]
    fn names_round_trip() {
        for event in PowerEvent::DESKTOP.into_iter().chain(PowerEvent::MOBILE) {
            assert_eq!(event.name().parse::<PowerEvent>(), Ok(event));
        }
        assert_eq!("screens-will-sleep".parse::<PowerEvent>(), Ok(PowerEvent::ScreensDidSleep));
        assert_eq!(
            "lid-closed".parse::<PowerEvent>(),
            Err(UnknownEvent("lid-closed".to_string()))
        );
    }

    #[tokio::test]
    async fn merges_in_posting_order() {
        let center = NotificationCenter::<u32>::default();
        let mut merged = center.merge(&PowerEvent::DESKTOP);

        let sleeper = center.clone();
        sleeper.post(PowerEvent::WillSleep, 1);
        center.post(PowerEvent::DidWake, 2);
        sleeper.post(PowerEvent::ScreensDidWake, 3);

        let events: Vec<_> = [
            merged.recv().await.unwrap(),
            merged.recv().await.unwrap(),
            merged.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|n| (n.event, n.payload))
        .collect();
        assert_eq!(
            events,
            vec![
                (PowerEvent::WillSleep, 1),
                (PowerEvent::DidWake, 2),
                (PowerEvent::ScreensDidWake, 3),
            ]
        );
    }

    #[tokio::test]
    async fn filters_unrequested_events() {
        let center = NotificationCenter::<()>::default();
        let mut merged = center.merge(&[PowerEvent::DidWake]);

        center.post(PowerEvent::WillSleep, ());
        center.post(PowerEvent::DidWake, ());

        assert_eq!(merged.recv().await.unwrap().event, PowerEvent::DidWake);
    }

    #[test]
    fn late_subscriber_sees_only_new_events() {
        let center = NotificationCenter::<()>::default();
        center.post(PowerEvent::WillSleep, ());

        let mut merged = center.merge(&PowerEvent::DESKTOP);
        {
            let mut recv = task::spawn(merged.recv());
            assert_pending!(recv.poll());
        }

        center.post(PowerEvent::DidWake, ());
        let mut recv = task::spawn(merged.recv());
        assert_ready_eq!(
            recv.poll(),
            Some(Notification {
                event: PowerEvent::DidWake,
                payload: ()
            })
        );
    }

    #[tokio::test]
    async fn lagging_consumer_keeps_newest() {
        let center = NotificationCenter::<u32>::new(2);
        let mut merged = center.merge(&PowerEvent::DESKTOP);

        for n in 0..5 {
            center.post(PowerEvent::DidWake, n);
        }

        assert_eq!(merged.recv().await.unwrap().payload, 3);
        assert_eq!(merged.recv().await.unwrap().payload, 4);
    }

    #[tokio::test]
    async fn closes_when_posters_are_gone() {
        let center = NotificationCenter::<()>::default();
        let mut merged = center.merge(&PowerEvent::DESKTOP);
        center.post(PowerEvent::WillPowerOff, ());
        drop(center);

        assert_eq!(merged.recv().await.unwrap().event, PowerEvent::WillPowerOff);
        assert!(merged.recv().await.is_none());
    }
}

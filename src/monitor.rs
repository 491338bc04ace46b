//! Activity monitor: the single writer of the timer state.
//!
//! One task owns the [`TimerState`] and selects over the merged power
//! notifications, restart requests from its [`MonitorHandle`], and whichever
//! wait the last poll armed (an idle-timeout deadline, the next input event,
//! or a grace expiry).
//! Notifications win ties, so a sleep notification arriving while the loop
//! is parked on a long idle timeout is applied immediately.
//!
//! Every change of state (never a repeated poll) is published on a watch
//! channel. Subscribers see the newest value only, so a slow subscriber never
//! holds up the monitor.

use async_trait::async_trait;
use std::future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::background::BackgroundTasks;
use crate::clock::{Clock, ClockInstant};
use crate::drift::SuspendDrift;
use crate::notifications::{MergedNotifications, PowerEvent};
use crate::timer::TimerState;

/// Durations that drive the monitor. Fixed for the lifetime of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time since the last input event after which the user is idle.
    pub user_idle: Duration,
    /// Wake-ups later than this past their deadline are logged. Not enforced.
    pub user_idle_tolerance: Duration,
    /// How long a backgrounded app still counts as active if reopened.
    pub background_grace_period: Duration,
    /// How long after locking the device still counts as active if unlocked.
    pub lock_grace_period: Duration,
    /// Minimum delay before a requested background task may run.
    pub background_task_interval: Duration,
    /// Drift between continuous and suspending clocks treated as a missed sleep.
    pub max_suspending_clock_drift: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_idle: Duration::from_secs(120),
            user_idle_tolerance: Duration::from_secs(5),
            background_grace_period: Duration::from_secs(2 * 60 * 60),
            lock_grace_period: Duration::from_secs(60),
            background_task_interval: Duration::from_secs(5 * 60),
            max_suspending_clock_drift: Duration::from_secs(10),
        }
    }
}

/// Input activity probe.
#[async_trait]
pub trait InputActivity: Send {
    /// Time since the most recent pointer, key or scroll event. Zero when unknown.
    fn since_last_event(&self) -> Duration;

    /// Completes on the next input event.
    async fn next_event(&mut self);
}

/// Display power probe.
pub trait DisplayPower: Send {
    fn is_main_display_asleep(&self) -> bool;
}

/// Application lifecycle probe for hosts that background and lock apps.
pub trait AppLifecycle: Send {
    fn is_protected_data_available(&self) -> bool;
    fn is_in_background(&self) -> bool;
}

/// What the monitor polls.
pub enum Sources {
    /// Poll input recency and display power; park on input while idle.
    Desktop {
        input: Box<dyn InputActivity>,
        display: Box<dyn DisplayPower>,
    },
    /// Poll foreground/background and lock state; park on notifications.
    Mobile { lifecycle: Box<dyn AppLifecycle> },
}

impl Sources {
    pub fn desktop(input: impl InputActivity + 'static, display: impl DisplayPower + 'static) -> Self {
        Sources::Desktop {
            input: Box::new(input),
            display: Box::new(display),
        }
    }

    pub fn mobile(lifecycle: impl AppLifecycle + 'static) -> Self {
        Sources::Mobile {
            lifecycle: Box::new(lifecycle),
        }
    }
}

/// The wait armed after a poll.
#[derive(Debug, Clone, Copy)]
enum Wait<I> {
    /// Poll again once the idle threshold would be crossed.
    IdleTimeout(I),
    /// Poll again on the next input event.
    Input,
    /// Report the lapse of the grace period.
    GraceExpiry(I),
    /// Nothing but notifications moves the state.
    Notification,
}

/// What a notification asks of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Keep the armed wait.
    Keep,
    /// Poll the sources again.
    Repoll,
}

/// Requests from a [`MonitorHandle`] to the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// User-initiated reset: active from now, start discarded.
    Restart,
}

/// Queued commands before `restart` starts to wait.
const COMMAND_BUFFER: usize = 10;

enum Outcome {
    Fired,
    Notified(PowerEvent),
    Commanded(Command),
    Closed,
}

/// The mutable half of the monitor, owned by the loop.
struct Writer<C: Clock> {
    config: MonitorConfig,
    state: TimerState<C>,
    updates: watch::Sender<TimerState<C>>,
    drift: Option<Box<dyn SuspendDrift>>,
    tasks: Option<BackgroundTasks<C::Instant>>,
}

impl<C: Clock> Writer<C> {
    /// Apply `mutate` and publish the result if it changed anything.
    fn update(&mut self, mutate: impl FnOnce(&mut TimerState<C>)) {
        let old = self.state.clone();
        mutate(&mut self.state);
        if self.state == old {
            return;
        }

        info!("State changed from {} to {}", old, self.state);

        if let Some(tasks) = self.tasks.as_mut() {
            if self.state.has_expiration() {
                tasks.schedule_after(self.state.clock().now(), self.config.background_task_interval);
            } else if old.has_expiration() {
                tasks.cancel_all();
            }
        }

        self.updates.send_replace(self.state.clone());
    }

    fn poll(&mut self, sources: &Sources) -> Wait<C::Instant> {
        debug!("Updating state: {}", self.state);
        let wait = match sources {
            Sources::Desktop { input, display } => self.poll_desktop(input.as_ref(), display.as_ref()),
            Sources::Mobile { lifecycle } => {
                self.poll_lifecycle(lifecycle.as_ref());
                self.grace_wait()
            }
        };
        debug!("Finished updating state: {}", self.state);
        wait
    }

    fn poll_desktop(&mut self, input: &dyn InputActivity, display: &dyn DisplayPower) -> Wait<C::Instant> {
        let last_event = input.since_last_event();
        let idle_remaining = self.config.user_idle.saturating_sub(last_event);
        let display_asleep = display.is_main_display_asleep();

        debug!("Last user event {:?} ago", last_event);
        if display_asleep {
            info!("Main display is asleep");
        }

        if idle_remaining.is_zero() || display_asleep {
            if self.state.is_active() {
                self.update(|state| state.deactivate());
            }
            debug!("Waiting for user activity event");
            Wait::Input
        } else {
            if self.state.is_idle() {
                self.update(|state| state.activate());
            }
            debug!("Sleeping for {:?}", idle_remaining);
            Wait::IdleTimeout(self.state.clock().now().advanced(idle_remaining))
        }
    }

    fn poll_lifecycle(&mut self, lifecycle: &dyn AppLifecycle) {
        if !lifecycle.is_protected_data_available() {
            self.update(|state| state.deactivate());
        } else if lifecycle.is_in_background() {
            let grace = self.config.background_grace_period;
            self.update(|state| state.activate_for(grace));
        } else {
            self.update(|state| state.activate());
        }
    }

    fn grace_wait(&self) -> Wait<C::Instant> {
        match self.state.expires() {
            Some(expires) => Wait::GraceExpiry(expires),
            None => Wait::Notification,
        }
    }

    /// Turn a lapsed grace period into a plain idle state.
    fn expire(&mut self) {
        if self.state.has_expiration() && self.state.is_idle() {
            self.update(|state| state.deactivate());
        }
    }

    fn handle(&mut self, event: PowerEvent) -> Flow {
        info!("Received {}", event);

        if let Some(drift) = self.drift.as_mut().and_then(|gauge| gauge.check()) {
            info!("Missed a sleep transition (drift {:?}), deactivating", drift);
            self.update(|state| state.deactivate());
        }

        let config = self.config;
        match event {
            PowerEvent::WillSleep | PowerEvent::ScreensDidSleep | PowerEvent::WillPowerOff => {
                self.update(|state| state.deactivate());
                Flow::Keep
            }
            PowerEvent::DidWake | PowerEvent::ScreensDidWake | PowerEvent::WillEnterForeground => {
                self.update(|state| state.activate());
                Flow::Keep
            }
            PowerEvent::DidEnterBackground => {
                self.update(|state| state.activate_for(config.background_grace_period));
                Flow::Keep
            }
            PowerEvent::ProtectedDataUnavailable => {
                self.update(|state| state.activate_for(config.lock_grace_period));
                Flow::Keep
            }
            // A refresh while in grace must not push the expiry back.
            PowerEvent::BackgroundRefresh if self.state.has_expiration() => {
                self.expire();
                Flow::Keep
            }
            PowerEvent::ProtectedDataAvailable | PowerEvent::BackgroundRefresh => Flow::Repoll,
        }
    }

    fn sync_background_tasks(&mut self) {
        if let Some(tasks) = self.tasks.as_mut() {
            if self.state.has_expiration() {
                tasks.schedule_after(self.state.clock().now(), self.config.background_task_interval);
            }
        }
    }
}

/// Tracks user activity and owns the timer state.
pub struct ActivityMonitor<C: Clock> {
    clock: C,
    sources: Sources,
    notifications: MergedNotifications,
    commands: mpsc::Receiver<Command>,
    control: mpsc::Sender<Command>,
    writer: Writer<C>,
}

impl<C: Clock> ActivityMonitor<C> {
    /// Create an idle monitor.
    pub fn new(config: MonitorConfig, clock: C, sources: Sources, notifications: MergedNotifications) -> Self {
        let state = TimerState::new(clock.clone());
        let (updates, _) = watch::channel(state.clone());
        let (control, commands) = mpsc::channel(COMMAND_BUFFER);
        Self {
            clock,
            sources,
            notifications,
            commands,
            control,
            writer: Writer {
                config,
                state,
                updates,
                drift: None,
                tasks: None,
            },
        }
    }

    /// Start from a previous state instead of idle.
    pub fn with_state(mut self, state: TimerState<C>) -> Self {
        self.writer.state = state.clone();
        self.writer.updates.send_replace(state);
        self
    }

    /// Deactivate whenever `drift` reports a missed sleep.
    pub fn with_drift(mut self, drift: impl SuspendDrift + 'static) -> Self {
        self.writer.drift = Some(Box::new(drift));
        self
    }

    /// Keep host background tasks in sync with grace periods.
    pub fn with_background_tasks(mut self, tasks: BackgroundTasks<C::Instant>) -> Self {
        self.writer.tasks = Some(tasks);
        self
    }

    /// Run the monitor on its own task.
    pub fn spawn(self) -> MonitorHandle<C> {
        let state = self.writer.updates.subscribe();
        let control = self.control.clone();
        let task = tokio::spawn(self.run());
        MonitorHandle {
            task,
            state,
            control,
        }
    }

    /// Run the monitor loop until the enclosing task is cancelled.
    pub async fn run(self) {
        let ActivityMonitor {
            clock,
            mut sources,
            mut notifications,
            mut commands,
            control,
            mut writer,
        } = self;
        drop(control);

        debug!("Starting activity monitor with {:?}", writer.config);
        let tolerance = writer.config.user_idle_tolerance;
        let mut notifications_open = true;
        let mut commands_open = true;

        writer.sync_background_tasks();
        let mut wait = writer.poll(&sources);

        loop {
            let outcome = {
                let armed = arm(wait, &clock, &mut sources, tolerance);
                tokio::pin!(armed);

                tokio::select! {
                    biased;
                    notification = notifications.recv(), if notifications_open => match notification {
                        Some(notification) => Outcome::Notified(notification.event),
                        None => Outcome::Closed,
                    },
                    command = commands.recv(), if commands_open => match command {
                        Some(command) => Outcome::Commanded(command),
                        None => {
                            commands_open = false;
                            continue;
                        }
                    },
                    () = &mut armed => Outcome::Fired,
                }
            };

            wait = match outcome {
                Outcome::Fired => match wait {
                    Wait::GraceExpiry(_) => {
                        writer.expire();
                        writer.grace_wait()
                    }
                    Wait::IdleTimeout(_) | Wait::Input | Wait::Notification => writer.poll(&sources),
                },
                Outcome::Notified(event) => match writer.handle(event) {
                    Flow::Repoll => writer.poll(&sources),
                    Flow::Keep => match wait {
                        Wait::GraceExpiry(_) | Wait::Notification => writer.grace_wait(),
                        armed @ (Wait::IdleTimeout(_) | Wait::Input) => armed,
                    },
                },
                Outcome::Commanded(Command::Restart) => {
                    info!("Restarting timer");
                    writer.update(|state| state.restart());
                    writer.poll(&sources)
                }
                Outcome::Closed => {
                    debug!("Notification sources closed");
                    notifications_open = false;
                    wait
                }
            };
        }
    }
}

async fn arm<C: Clock>(wait: Wait<C::Instant>, clock: &C, sources: &mut Sources, tolerance: Duration) {
    match wait {
        Wait::IdleTimeout(deadline) | Wait::GraceExpiry(deadline) => {
            clock.sleep_until(deadline).await;
            let late = deadline.duration_to(clock.now());
            if late > tolerance {
                debug!("Woke {:?} past deadline", late);
            }
        }
        Wait::Input => match sources {
            Sources::Desktop { input, .. } => {
                input.next_event().await;
                debug!("Received user activity event");
            }
            Sources::Mobile { .. } => future::pending().await,
        },
        Wait::Notification => future::pending().await,
    }
}

/// Owns a running monitor. Dropping the handle cancels the monitor.
pub struct MonitorHandle<C: Clock> {
    task: JoinHandle<()>,
    state: watch::Receiver<TimerState<C>>,
    control: mpsc::Sender<Command>,
}

impl<C: Clock> MonitorHandle<C> {
    /// Stream of states: the current one first, then each change.
    pub fn subscribe(&self) -> StateUpdates<C> {
        let mut rx = self.state.clone();
        rx.mark_changed();
        StateUpdates { rx }
    }

    /// The latest published state.
    pub fn state(&self) -> TimerState<C> {
        self.state.borrow().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.state.borrow().is_idle()
    }

    pub fn start(&self) -> Option<C::Instant> {
        self.state.borrow().start()
    }

    pub fn duration_to(&self, end: C::Instant) -> Duration {
        self.state.borrow().duration_to(end)
    }

    /// Discard the running timer and start counting again from now.
    pub async fn restart(&self) {
        if self.control.send(Command::Restart).await.is_err() {
            warn!("Monitor stopped, restart ignored");
        }
    }

    /// Stop the monitor. Every pending wait is dropped at once.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl<C: Clock> Drop for MonitorHandle<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One subscriber's view of the monitor's state changes.
pub struct StateUpdates<C: Clock> {
    rx: watch::Receiver<TimerState<C>>,
}

impl<C: Clock> StateUpdates<C> {
    /// The next state, or `None` once the monitor has stopped.
    pub async fn next(&mut self) -> Option<TimerState<C>> {
        self.rx.changed().await.ok()?;
        let state = self.rx.borrow_and_update().clone();
        Some(state)
    }
}

//! Background task requests used to re-evaluate the timer while the host
//! keeps the process suspended.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::clock::ClockInstant;

/// A pending request is only replaced when the new begin date is at least
/// this much later.
pub const MIN_RESCHEDULE_DELAY: Duration = Duration::from_secs(60);

/// Kind of background work requested from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Short refresh window.
    AppRefresh,
    /// Longer deferrable processing window.
    Processing {
        requires_external_power: bool,
        requires_network_connectivity: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundTask {
    pub identifier: String,
    pub kind: TaskKind,
}

impl BackgroundTask {
    pub fn app_refresh(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: TaskKind::AppRefresh,
        }
    }

    pub fn processing(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            kind: TaskKind::Processing {
                requires_external_power: false,
                requires_network_connectivity: false,
            },
        }
    }
}

/// A request to launch `task` no earlier than `earliest_begin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest<I> {
    pub task: BackgroundTask,
    pub earliest_begin: I,
}

/// Errors reported by a host task scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("background work is unavailable")]
    Unavailable,
    #[error("too many pending task requests")]
    TooManyPending,
    #[error("not permitted to launch background tasks")]
    NotPermitted,
    #[error("unknown scheduler error: {0}")]
    Unknown(String),
}

/// The host's background task scheduler.
pub trait TaskScheduler<I>: Send {
    fn submit(&mut self, request: &TaskRequest<I>) -> Result<(), SchedulerError>;
    fn cancel(&mut self, identifier: &str) -> Result<(), SchedulerError>;
}

/// Keeps the host scheduler in sync with the timer's grace period.
///
/// Only the monitor task calls into this, so schedule and cancel for one
/// identifier never interleave.
pub struct BackgroundTasks<I> {
    scheduler: Box<dyn TaskScheduler<I>>,
    tasks: Vec<BackgroundTask>,
    pending: HashMap<String, I>,
}

impl<I: ClockInstant> BackgroundTasks<I> {
    pub fn new(scheduler: Box<dyn TaskScheduler<I>>, tasks: Vec<BackgroundTask>) -> Self {
        Self {
            scheduler,
            tasks,
            pending: HashMap::new(),
        }
    }

    /// Request every task to run no sooner than `interval` after `now`.
    ///
    /// Pending requests that would move by less than
    /// [`MIN_RESCHEDULE_DELAY`] are left alone.
    pub fn schedule_after(&mut self, now: I, interval: Duration) {
        let earliest_begin = now.advanced(interval);

        for task in &self.tasks {
            let id = &task.identifier;
            if let Some(&pending) = self.pending.get(id) {
                if earliest_begin < pending.advanced(MIN_RESCHEDULE_DELAY) {
                    debug!("{} task already scheduled for {:?}", id, pending);
                    continue;
                }
                if let Err(e) = self.scheduler.cancel(id) {
                    log_scheduler_error(id, &e);
                }
                self.pending.remove(id);
            }

            let request = TaskRequest {
                task: task.clone(),
                earliest_begin,
            };
            match self.scheduler.submit(&request) {
                Ok(()) => {
                    info!("Scheduled {} task after {:?}", id, earliest_begin);
                    self.pending.insert(id.clone(), earliest_begin);
                }
                Err(e) => log_scheduler_error(id, &e),
            }
        }
    }

    /// Cancel every task, pending or not.
    pub fn cancel_all(&mut self) {
        for task in &self.tasks {
            match self.scheduler.cancel(&task.identifier) {
                Ok(()) => debug!("Cancelled {} task", task.identifier),
                Err(e) => log_scheduler_error(&task.identifier, &e),
            }
        }
        self.pending.clear();
    }

    /// Begin date of the pending request for `identifier`, if any.
    pub fn pending(&self, identifier: &str) -> Option<I> {
        self.pending.get(identifier).copied()
    }
}

fn log_scheduler_error(identifier: &str, err: &SchedulerError) {
    match err {
        SchedulerError::Unavailable => info!("Can't schedule background work for {}", identifier),
        SchedulerError::TooManyPending => error!("Too many pending {} tasks requested", identifier),
        SchedulerError::NotPermitted => error!("Not permitted to launch {} task", identifier),
        SchedulerError::Unknown(reason) => {
            error!("Unknown error scheduling {} task: {}", identifier, reason)
        }
    }
}

//! Timer state persistence across daemon restarts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, ClockInstant, UtcClock};
use crate::monitor::StateUpdates;
use crate::timer::{TimerSnapshot, TimerState};

/// File name of the snapshot inside the data directory.
pub const STATE_FILE: &str = "state.json";

/// Persisted wall-clock timer variant.
pub type WallSnapshot = TimerSnapshot<DateTime<Utc>>;

/// Contents of the state file: the timer and when it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedState {
    pub saved_at: DateTime<Utc>,
    pub timer: WallSnapshot,
}

impl SavedState {
    /// Snapshot of `state` stamped with its clock's current time.
    pub fn of(state: &TimerState<UtcClock>) -> Self {
        Self {
            saved_at: state.clock().now(),
            timer: state.snapshot(),
        }
    }

    /// The saved timer, or `Idle` if more than `max_age` passed since it was
    /// written. Nobody could have been active through that much downtime.
    pub fn resume(self, now: DateTime<Utc>, max_age: Duration) -> WallSnapshot {
        let age = self.saved_at.duration_to(now);
        if age > max_age {
            info!("Saved state is {:?} old, starting idle", age);
            TimerSnapshot::Idle
        } else {
            self.timer
        }
    }
}

/// Reads and writes `<data_dir>/state.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Create a store in `data_dir`, creating the directory if needed.
    pub fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(Self {
            path: data_dir.join(STATE_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last saved state, or `None` if nothing was saved yet.
    pub fn load(&self) -> Result<Option<SavedState>> {
        if !self.path.exists() {
            debug!("No saved state at {:?}", self.path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read state file: {:?}", self.path))?;
        let saved = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {:?}", self.path))?;
        Ok(Some(saved))
    }

    /// Replace the saved state. Readers never see a partial file.
    pub fn save(&self, saved: &SavedState) -> Result<()> {
        let json = serde_json::to_string(saved).context("Failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json).with_context(|| format!("Failed to write state file: {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {:?}", self.path))?;

        debug!("Saved state to {:?}", self.path);
        Ok(())
    }

    /// Save every state published by the monitor until it stops.
    pub async fn persist(&self, mut updates: StateUpdates<UtcClock>) {
        while let Some(state) = updates.next().await {
            info!("Timer {}", state);
            if let Err(e) = self.save(&SavedState::of(&state)) {
                warn!("Failed to save state: {:#}", e);
            }
        }
        debug!("State updates ended");
    }
}

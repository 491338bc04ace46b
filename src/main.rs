//! Aware - activity timer daemon
//!
//! Watches input activity, display power and host sleep, keeps the activity
//! timer up to date and persists it so a relaunch picks up where it left off.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{error, info, warn};

use aware::config::{Config, LogFormat, LoggingConfig};
use aware::drift::ClockDrift;
use aware::snapshot::{SavedState, SnapshotStore};
use aware::{
    idle, power, ActivityMonitor, Clock, MonotonicClock, NotificationCenter, PowerEvent,
    TimerState, UtcClock,
};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting aware v{}", VERSION);
    info!(
        "Configuration loaded: idle threshold={}s, max drift={}s",
        config.idle.threshold_seconds, config.drift.max_drift_seconds
    );

    let monitor_config = config.monitor_config();
    let max_drift = monitor_config.max_suspending_clock_drift;

    let store = SnapshotStore::new(&config.logging.data_dir)?;
    info!("Timer state file: {:?}", store.path());
    let state = match store.load() {
        Ok(Some(saved)) => {
            let snapshot = saved.resume(UtcClock.now(), monitor_config.user_idle);
            let state = TimerState::restore(snapshot, UtcClock);
            info!("Restored timer {}", state);
            state
        }
        Ok(None) => TimerState::new(UtcClock),
        Err(e) => {
            warn!("Ignoring saved state: {:#}", e);
            TimerState::new(UtcClock)
        }
    };

    let center = NotificationCenter::default();

    let sources = idle::desktop_sources(config.idle.poll_interval())
        .context("Failed to set up input probes")?;
    let display = idle::main_display().context("Failed to set up display probe")?;

    let monitor = ActivityMonitor::new(
        monitor_config,
        UtcClock,
        sources,
        center.merge(&PowerEvent::DESKTOP),
    )
    .with_state(state)
    .with_drift(ClockDrift::new(UtcClock, MonotonicClock, max_drift));

    let resume_watcher = tokio::spawn(power::watch_resume(
        center.clone(),
        ClockDrift::new(UtcClock, MonotonicClock, max_drift),
        config.power.resume_interval(),
    ));
    let display_watcher = tokio::spawn(power::watch_display(
        center.clone(),
        display,
        config.power.display_interval(),
    ));

    let handle = monitor.spawn();
    let updates = handle.subscribe();
    let persist_store = store.clone();
    let persister = tokio::spawn(async move { persist_store.persist(updates).await });

    if let Err(e) = power::shutdown_signal().await {
        error!("Shutdown signal error: {:#}", e);
    }

    // Cleanup
    info!("Shutting down...");
    resume_watcher.abort();
    display_watcher.abort();
    handle.cancel();
    let _ = persister.await;

    let state = handle.state();
    store
        .save(&SavedState::of(&state))
        .context("Failed to save final state")?;

    info!("Timer {} at exit. Goodbye!", state);
    Ok(())
}

/// Initialize tracing subscriber from the logging configuration.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match logging.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .try_init(),
    }
    .context("Failed to initialize tracing")?;

    Ok(())
}

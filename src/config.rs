//! Configuration loading from TOML files and environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::MonitorConfig;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub idle: IdleConfig,
    #[serde(default)]
    pub grace: GraceConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Idle detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdleConfig {
    /// Seconds without input after which the user is idle.
    #[serde(default = "default_idle_threshold")]
    pub threshold_seconds: u64,
    /// Acceptable lateness of the idle timeout, in seconds.
    #[serde(default = "default_idle_tolerance")]
    pub tolerance_seconds: u64,
    /// Idle counter poll interval while waiting for input, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold_seconds: default_idle_threshold(),
            tolerance_seconds: default_idle_tolerance(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl IdleConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_secs(self.threshold_seconds)
    }

    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Grace periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraceConfig {
    /// Seconds a backgrounded app still counts as active.
    #[serde(default = "default_background_grace")]
    pub background_seconds: u64,
    /// Seconds a locked device still counts as active.
    #[serde(default = "default_lock_grace")]
    pub lock_seconds: u64,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            background_seconds: default_background_grace(),
            lock_seconds: default_lock_grace(),
        }
    }
}

/// Background task configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Minimum delay before a requested background task may run, in seconds.
    #[serde(default = "default_task_interval")]
    pub task_interval_seconds: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            task_interval_seconds: default_task_interval(),
        }
    }
}

/// Suspending clock drift configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Drift in seconds treated as a missed sleep.
    #[serde(default = "default_max_drift")]
    pub max_drift_seconds: u64,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            max_drift_seconds: default_max_drift(),
        }
    }
}

impl DriftConfig {
    pub fn max_drift(&self) -> Duration {
        Duration::from_secs(self.max_drift_seconds)
    }
}

/// Power event watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Resume check interval in milliseconds.
    #[serde(default = "default_resume_interval_ms")]
    pub resume_interval_ms: u64,
    /// Display power check interval in milliseconds.
    #[serde(default = "default_display_interval_ms")]
    pub display_interval_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            resume_interval_ms: default_resume_interval_ms(),
            display_interval_ms: default_display_interval_ms(),
        }
    }
}

impl PowerConfig {
    pub fn resume_interval(&self) -> Duration {
        Duration::from_millis(self.resume_interval_ms)
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Data directory for the state snapshot.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default value functions
fn default_idle_threshold() -> u64 {
    120
}

fn default_idle_tolerance() -> u64 {
    5
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_background_grace() -> u64 {
    2 * 60 * 60
}

fn default_lock_grace() -> u64 {
    60
}

fn default_task_interval() -> u64 {
    5 * 60
}

fn default_max_drift() -> u64 {
    10
}

fn default_resume_interval_ms() -> u64 {
    5_000
}

fn default_display_interval_ms() -> u64 {
    2_000
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".aware"))
        .unwrap_or_else(|| PathBuf::from(".aware"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file")?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(path)?
        } else {
            let default_paths = [
                PathBuf::from("config/default.toml"),
                dirs::config_dir()
                    .map(|d| d.join("aware/config.toml"))
                    .unwrap_or_default(),
            ];

            let mut loaded = None;
            for path in &default_paths {
                if path.is_file() {
                    loaded = Some(Self::from_file(path)?);
                    break;
                }
            }
            loaded.unwrap_or_default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.logging.data_dir = expand_tilde(&config.logging.data_dir);

        Ok(config)
    }

    /// Apply `AWARE_*` overrides read through `var`.
    ///
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("AWARE_IDLE_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.idle.threshold_seconds = v;
        }
        if let Some(v) = var("AWARE_IDLE_TOLERANCE").and_then(|v| v.parse().ok()) {
            self.idle.tolerance_seconds = v;
        }
        if let Some(v) = var("AWARE_MAX_DRIFT").and_then(|v| v.parse().ok()) {
            self.drift.max_drift_seconds = v;
        }
        if let Some(val) = var("AWARE_DATA_DIR") {
            self.logging.data_dir = PathBuf::from(val);
        }
        if let Some(val) = var("AWARE_LOG_LEVEL") {
            self.logging.level = val;
        }
        match var("AWARE_LOG_FORMAT").as_deref() {
            Some("json") => self.logging.format = LogFormat::Json,
            Some("pretty") => self.logging.format = LogFormat::Pretty,
            _ => {}
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.idle.threshold_seconds == 0 {
            anyhow::bail!("Idle threshold must be greater than 0");
        }
        if self.idle.tolerance_seconds >= self.idle.threshold_seconds {
            anyhow::bail!("Idle tolerance must be smaller than the idle threshold");
        }
        if self.idle.poll_interval_ms == 0 {
            anyhow::bail!("Idle poll interval must be greater than 0");
        }
        if self.grace.background_seconds == 0 || self.grace.lock_seconds == 0 {
            anyhow::bail!("Grace periods must be greater than 0");
        }
        if self.power.resume_interval_ms == 0 || self.power.display_interval_ms == 0 {
            anyhow::bail!("Power check intervals must be greater than 0");
        }
        Ok(())
    }

    /// Durations driving the activity monitor.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            user_idle: self.idle.threshold(),
            user_idle_tolerance: self.idle.tolerance(),
            background_grace_period: Duration::from_secs(self.grace.background_seconds),
            lock_grace_period: Duration::from_secs(self.grace.lock_seconds),
            background_task_interval: Duration::from_secs(self.background.task_interval_seconds),
            max_suspending_clock_drift: self.drift.max_drift(),
        }
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_monitor_defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.monitor_config(), MonitorConfig::default());
    }

    #[test]
    fn shipped_file_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let config = Config::from_file(path).unwrap();

        config.validate().unwrap();
        assert_eq!(config.monitor_config(), MonitorConfig::default());
        assert_eq!(config.power.resume_interval(), Duration::from_secs(5));
        assert_eq!(config.logging.data_dir, PathBuf::from("~/.aware"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[idle]
threshold_seconds = 300

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.idle.threshold(), Duration::from_secs(300));
        assert_eq!(config.idle.tolerance(), Duration::from_secs(5));
        assert_eq!(config.grace.lock_seconds, 60);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(dir.path().join("missing.toml").as_path())).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("AWARE_IDLE_THRESHOLD", "600"),
            ("AWARE_IDLE_TOLERANCE", "not a number"),
            ("AWARE_MAX_DRIFT", "30"),
            ("AWARE_DATA_DIR", "/var/lib/aware"),
            ("AWARE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.idle.threshold_seconds, 600);
        assert_eq!(config.idle.tolerance_seconds, 5);
        assert_eq!(config.drift.max_drift(), Duration::from_secs(30));
        assert_eq!(config.logging.data_dir, PathBuf::from("/var/lib/aware"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn rejects_bad_durations() {
        let mut config = Config::default();
        config.idle.threshold_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.idle.tolerance_seconds = config.idle.threshold_seconds;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.power.display_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn expands_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_tilde(Path::new("~/.aware")), home.join(".aware"));
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(expand_tilde(Path::new("/tmp/aware")), PathBuf::from("/tmp/aware"));
    }
}

//! Process configuration.
//!
//! Loaded from `mnemon.toml`; every field has a default so an empty file
//! (or none at all) yields a runnable single-process setup under
//! `~/.mnemon`.

use mnemon_lifecycle::LifecyclePolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main configuration for the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory of YAML table definitions, one per table.
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,

    /// Folders watched by auto-ingestion.
    #[serde(default = "default_watch_folders")]
    pub watch_folders: Vec<PathBuf>,

    /// Staging scan interval in seconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,

    /// Approval drain interval in seconds.
    #[serde(default = "default_approval_interval")]
    pub approval_interval_seconds: u64,

    /// Alert monitor interval in seconds.
    #[serde(default = "default_alert_interval")]
    pub alert_interval_seconds: u64,

    /// Governance RPC timeout in seconds.
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_seconds: u64,

    /// Confidence floor for auto-approving medium-risk updates.
    #[serde(default = "default_confidence_floor")]
    pub medium_confidence_floor: f64,

    /// Hours after which an undecided pending proposal is discarded.
    #[serde(default = "default_stale_pending_hours")]
    pub stale_pending_hours: i64,

    /// Lifecycle manager thresholds.
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
}

fn default_database_path() -> PathBuf {
    mnemon_logging::default_database_path()
}

fn default_schema_dir() -> PathBuf {
    mnemon_logging::default_schema_dir()
}

fn default_watch_folders() -> Vec<PathBuf> {
    vec![
        PathBuf::from("training_data"),
        PathBuf::from("storage/uploads"),
        PathBuf::from("grace_training"),
    ]
}

fn default_scan_interval() -> u64 {
    30
}

fn default_approval_interval() -> u64 {
    15
}

fn default_alert_interval() -> u64 {
    60
}

fn default_gateway_timeout() -> u64 {
    5
}

fn default_confidence_floor() -> f64 {
    0.75
}

fn default_stale_pending_hours() -> i64 {
    24
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            schema_dir: default_schema_dir(),
            watch_folders: default_watch_folders(),
            scan_interval_seconds: default_scan_interval(),
            approval_interval_seconds: default_approval_interval(),
            alert_interval_seconds: default_alert_interval(),
            gateway_timeout_seconds: default_gateway_timeout(),
            medium_confidence_floor: default_confidence_floor(),
            stale_pending_hours: default_stale_pending_hours(),
            lifecycle: LifecyclePolicy::default(),
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_folders.is_empty() {
            return Err(ConfigError::Invalid(
                "watch_folders must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.medium_confidence_floor) {
            return Err(ConfigError::Invalid(format!(
                "medium_confidence_floor must be in [0, 1], got {}",
                self.medium_confidence_floor
            )));
        }
        if !(0.0..=1.0).contains(&self.lifecycle.min_trust_threshold) {
            return Err(ConfigError::Invalid(format!(
                "lifecycle.min_trust_threshold must be in [0, 1], got {}",
                self.lifecycle.min_trust_threshold
            )));
        }
        if self.scan_interval_seconds == 0 || self.approval_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "scan and approval intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

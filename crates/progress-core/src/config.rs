//! Tracker configuration.
//!
//! Resolution order:
//! 1. an explicit config file path
//! 2. the file named by `PROGRESS_CONFIG`
//! 3. built-in defaults
//!
//! Environment variables are applied on top of whichever source won:
//! - `PROGRESS_SWEEP_INTERVAL_SECS`
//! - `PROGRESS_RETENTION_SECS`
//! - `PROGRESS_TEARDOWN_DELAY_MS`
//! - `PROGRESS_MAX_TASK_AGE_SECS` (`none` or `0` disables the ceiling)
//! - `PROGRESS_STRICT_WEIGHTS`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CoreError, CoreErrorKind, StagePlan};

pub const CONFIG_PATH_ENV: &str = "PROGRESS_CONFIG";
pub const SWEEP_INTERVAL_ENV: &str = "PROGRESS_SWEEP_INTERVAL_SECS";
pub const RETENTION_ENV: &str = "PROGRESS_RETENTION_SECS";
pub const TEARDOWN_DELAY_ENV: &str = "PROGRESS_TEARDOWN_DELAY_MS";
pub const MAX_TASK_AGE_ENV: &str = "PROGRESS_MAX_TASK_AGE_SECS";
pub const STRICT_WEIGHTS_ENV: &str = "PROGRESS_STRICT_WEIGHTS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] CoreError),

    #[error("environment variable {name} has invalid value '{value}'")]
    Env { name: &'static str, value: String },
}

/// What `try_create` does when the id is already tracked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    #[default]
    Overwrite,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    pub stages: StagePlan,
    pub strict_weights: bool,
    pub sweep_interval_secs: u64,
    pub retention_secs: u64,
    pub teardown_delay_ms: u64,
    pub max_task_age_secs: Option<u64>,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stages: StagePlan::default(),
            strict_weights: false,
            sweep_interval_secs: 5 * 60,
            retention_secs: 60 * 60,
            teardown_delay_ms: 1_000,
            max_task_age_secs: Some(24 * 60 * 60),
            duplicate_policy: DuplicatePolicy::Overwrite,
        }
    }
}

impl TrackerConfig {
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match std::env::var(CONFIG_PATH_ENV) {
                Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path))?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply_env_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(SWEEP_INTERVAL_ENV) {
            self.sweep_interval_secs = parse_u64(SWEEP_INTERVAL_ENV, &value)?;
        }
        if let Some(value) = lookup(RETENTION_ENV) {
            self.retention_secs = parse_u64(RETENTION_ENV, &value)?;
        }
        if let Some(value) = lookup(TEARDOWN_DELAY_ENV) {
            self.teardown_delay_ms = parse_u64(TEARDOWN_DELAY_ENV, &value)?;
        }
        if let Some(value) = lookup(MAX_TASK_AGE_ENV) {
            self.max_task_age_secs = if value.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                match parse_u64(MAX_TASK_AGE_ENV, &value)? {
                    0 => None,
                    seconds => Some(seconds),
                }
            };
        }
        if let Some(value) = lookup(STRICT_WEIGHTS_ENV) {
            self.strict_weights = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Env {
                        name: STRICT_WEIGHTS_ENV,
                        value,
                    });
                }
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.stages.validate(self.strict_weights)?;
        if self.sweep_interval_secs == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidConfig,
                "sweep interval must be at least one second",
            ));
        }
        if !self.stages.is_normalized() {
            tracing::warn!(
                total_weight = self.stages.total_weight(),
                "stage weights do not sum to 1.0"
            );
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn teardown_delay(&self) -> Duration {
        Duration::from_millis(self.teardown_delay_ms)
    }

    pub fn max_task_age(&self) -> Option<Duration> {
        self.max_task_age_secs.map(Duration::from_secs)
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::Env {
        name,
        value: value.to_string(),
    })
}

//! Engine configuration
//!
//! Settings for the process-wide worker pool and the default logger.
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. Environment variables (YAOXIANG_FLOW_WORKERS, YAOXIANG_FLOW_IDLE_TIMEOUT_MS, YAOXIANG_FLOW_LOG)
//! 2. Configuration file (flow.toml)
//! 3. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use yaoxiang_flow::util::config::EngineConfig;
//!
//! let config: EngineConfig = toml::from_str("workers = 2").unwrap();
//! assert_eq!(config.scheduler_config().num_workers, 2);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::scheduler::{SchedulerConfig, TaskPriority};
use crate::util::logger::LogLevel;

/// Worker count override.
pub const ENV_WORKERS: &str = "YAOXIANG_FLOW_WORKERS";
/// Idle timeout override, in milliseconds.
pub const ENV_IDLE_TIMEOUT_MS: &str = "YAOXIANG_FLOW_IDLE_TIMEOUT_MS";
/// Log level override.
pub const ENV_LOG: &str = "YAOXIANG_FLOW_LOG";

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "flow.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads of the global pool; `0` uses the available parallelism.
    pub workers: usize,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
    /// Stack size of each worker, in bytes.
    pub stack_size: usize,
    /// Longest idle sleep of a worker, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Priority of work spawned outside of any arena.
    pub default_priority: TaskPriority,
    /// Level used by the default logger.
    pub log_level: LogLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_name_prefix: "flow-worker".to_string(),
            stack_size: 2 * 1024 * 1024,
            idle_timeout_ms: 1,
            default_priority: TaskPriority::Medium,
            log_level: LogLevel::Info,
        }
    }
}

impl EngineConfig {
    /// Defaults, then `flow.toml` if present, then the environment.
    ///
    /// Unreadable sources and bad values are skipped with a warning so the
    /// global pool can always start.
    pub fn from_env() -> Self {
        let base = match load_config(CONFIG_FILE_NAME) {
            Ok(config) => config,
            Err(ConfigError::Io { .. }) => EngineConfig::default(),
            Err(err) => {
                tracing::warn!("ignoring {}: {}", CONFIG_FILE_NAME, err);
                EngineConfig::default()
            },
        };

        let mut config = base.clone();
        match config.apply_overrides(|key| std::env::var(key).ok()) {
            Ok(()) => config,
            Err(err) => {
                tracing::warn!("ignoring environment overrides: {}", err);
                base
            },
        }
    }

    /// Apply overrides looked up through `lookup` (normally the environment).
    pub fn apply_overrides<F>(
        &mut self,
        lookup: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_WORKERS) {
            self.workers = parse_value(ENV_WORKERS, &value)?;
        }
        if let Some(value) = lookup(ENV_IDLE_TIMEOUT_MS) {
            self.idle_timeout_ms = parse_value(ENV_IDLE_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_level = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_LOG.to_string(),
                value,
            })?;
        }
        Ok(())
    }

    /// Scheduler configuration for a pool built from these settings.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            num_workers: match self.workers {
                0 => defaults.num_workers,
                n => n,
            },
            stack_size: self.stack_size,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms.max(1)),
            thread_name_prefix: self.thread_name_prefix.clone(),
            default_priority: self.default_priority,
            ..defaults
        }
    }
}

fn parse_value<T: std::str::FromStr>(
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Load a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(ConfigError::Parse)
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

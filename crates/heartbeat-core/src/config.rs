//! Configuration management for heartbeat
//!
//! Handles loading and validation of heartbeat.toml configuration files.
//! Every section is optional; missing fields fall back to the defaults below.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Sample log store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Windowed aggregation settings
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Outbound event bus settings
    #[serde(default)]
    pub events: EventsConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use
    #[default]
    Pretty,
    /// JSON lines for CI and log shippers
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown log format: {s}. Expected one of: pretty, json"
            )),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file, written in addition to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which sample log store backs the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local logs, lost on exit
    #[default]
    Memory,
    /// SQLite file at `db_path`
    Sqlite,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database file path (sqlite backend only)
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("heartbeat.db")
}

/// Aggregation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Periodic trigger interval in milliseconds (0 disables the timer)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Deadline for all fan-out reads of one cycle to complete
    #[serde(default = "default_fan_in_timeout_ms")]
    pub fan_in_timeout_ms: u64,
}

impl AggregationConfig {
    /// Periodic interval, or `None` when the timer is disabled.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }

    #[must_use]
    pub fn fan_in_timeout(&self) -> Duration {
        Duration::from_millis(self.fan_in_timeout_ms)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fan_in_timeout_ms: default_fan_in_timeout_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    3000
}

fn default_fan_in_timeout_ms() -> u64 {
    5000
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size; slow subscribers past this lag drop events
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize {
    1024
}

impl Config {
    /// Load configuration from an optional path, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .general
            .log_level
            .parse::<crate::logging::LogLevel>()
            .is_err()
        {
            return Err(ConfigError::ValidationError(format!(
                "general.log_level: unknown level {:?}",
                self.general.log_level
            )));
        }
        if self.aggregation.fan_in_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "aggregation.fan_in_timeout_ms must be >= 1".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "events.capacity must be >= 1".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Sqlite && self.store.db_path.as_os_str().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "store.db_path must be set for the sqlite backend".to_string(),
            ));
        }
        Ok(())
    }
}

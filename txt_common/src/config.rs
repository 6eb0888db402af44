//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the link engine and the `txt_link` binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use txt_common::config::{AppConfig, ConfigError, ConfigLoader};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = AppConfig::load(Path::new("txt_link.toml"))?;
//!     config.link.validate()?;
//!     println!("Controller: {}:{}", config.link.host, config.link.port);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CYCLE_TIME_MS, DEFAULT_MISS_THRESHOLD, DEFAULT_PORT,
    DEFAULT_RESPONSE_TIMEOUT_MS, IF_TXT_MAX,
};
use crate::ids::{Counter, CounterMode, Input, InputMode, InterfaceId, Motor, MotorMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Whether individual frame exchanges are logged at this level.
    pub const fn logs_frames(self) -> bool {
        matches!(self, Self::Trace | Self::Debug)
    }

    /// Whether callback firings and link events are logged at this level.
    pub const fn logs_events(self) -> bool {
        matches!(self, Self::Trace | Self::Debug | Self::Info)
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn default_host() -> String {
    "192.168.7.2".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interface_count() -> usize {
    1
}

fn default_cycle_time_ms() -> u64 {
    DEFAULT_CYCLE_TIME_MS
}

fn default_response_timeout_ms() -> u64 {
    DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_miss_threshold() -> u32 {
    DEFAULT_MISS_THRESHOLD
}

/// Link settings for one controller connection.
///
/// # TOML Example
///
/// ```toml
/// [link]
/// host = "192.168.7.2"
/// port = 65000
/// interface_count = 2
/// cycle_time_ms = 10
/// miss_threshold = 10
/// log_dir = "/tmp/txt"
/// log_level = "debug"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Controller host name or address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Transfer-area service port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of logical interfaces exchanged (1 = local controller only).
    #[serde(default = "default_interface_count")]
    pub interface_count: usize,

    /// Exchange cycle time in milliseconds.
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Bounded wait for each firmware response in milliseconds.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Consecutive misses tolerated before the link is declared lost.
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,

    /// Directory for the append-only frame log. No log when omitted.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Verbosity of the frame log.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            interface_count: default_interface_count(),
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            miss_threshold: DEFAULT_MISS_THRESHOLD,
            log_dir: None,
            log_level: LogLevel::default(),
        }
    }
}

impl LinkConfig {
    /// Config for `host:port` with all other settings at their defaults.
    pub fn new(interface_count: usize, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            interface_count,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    ///
    /// # Validation Rules
    /// 1. `host` is not empty
    /// 2. `1 <= interface_count <= IF_TXT_MAX`
    /// 3. `cycle_time_ms`, `response_timeout_ms` and `miss_threshold` > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "host cannot be empty".to_string(),
            ));
        }
        if self.interface_count == 0 || self.interface_count > IF_TXT_MAX {
            return Err(ConfigError::ValidationError(format!(
                "interface_count must be 1..={} (got {})",
                IF_TXT_MAX, self.interface_count
            )));
        }
        if self.cycle_time_ms == 0 {
            return Err(ConfigError::ValidationError(
                "cycle_time_ms must be greater than 0".to_string(),
            ));
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "response_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.miss_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "miss_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Cycle time as Duration.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }

    /// Response timeout as Duration.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Initial mode of one universal input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSetup {
    /// Interface the input belongs to.
    #[serde(default = "default_interface")]
    pub interface: InterfaceId,
    /// Input slot.
    pub input: Input,
    /// Measurement mode.
    pub mode: InputMode,
    /// Evaluate as digital.
    #[serde(default)]
    pub digital: bool,
}

/// Initial mode of one motor slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorSetup {
    /// Interface the motor belongs to.
    #[serde(default = "default_interface")]
    pub interface: InterfaceId,
    /// Motor slot.
    pub motor: Motor,
    /// Bridge mode.
    pub mode: MotorMode,
}

/// Initial mode of one counter slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSetup {
    /// Interface the counter belongs to.
    #[serde(default = "default_interface")]
    pub interface: InterfaceId,
    /// Counter slot.
    pub counter: Counter,
    /// Counting mode.
    pub mode: CounterMode,
}

fn default_interface() -> InterfaceId {
    InterfaceId::LocalIo
}

/// Slot modes applied before the link starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotSetup {
    /// Universal inputs.
    #[serde(default)]
    pub inputs: Vec<InputSetup>,
    /// Motors.
    #[serde(default)]
    pub motors: Vec<MotorSetup>,
    /// Counters.
    #[serde(default)]
    pub counters: Vec<CounterSetup>,
}

/// Top-level application configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Link settings.
    #[serde(default)]
    pub link: LinkConfig,
    /// Initial slot modes.
    #[serde(default)]
    pub setup: SlotSetup,
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
/// - Returns `ConfigError::ValidationError` if semantic validation fails
///
/// # Example
///
/// ```rust,no_run
/// use txt_common::config::{ConfigError, ConfigLoader, LinkConfig};
/// use serde::Deserialize;
/// use std::path::Path;
///
/// #[derive(Debug, Deserialize)]
/// struct BenchConfig {
///     link: LinkConfig,
///     repetitions: u32,
/// }
///
/// fn main() -> Result<(), ConfigError> {
///     let config = BenchConfig::load(Path::new("bench.toml"))?;
///     Ok(())
/// }
/// ```
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Successfully loaded and parsed configuration
    /// * `Err(ConfigError)` - Loading or parsing failed
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
// This allows any serde-deserializable struct to use ConfigLoader.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

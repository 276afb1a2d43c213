//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so an empty file (or no file at all, via
//! [`Config::default`]) is a valid configuration.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device family identifiers matched against advertised names
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DeviceConfig {
    #[serde(default = "default_fardriver_name")]
    pub fardriver_name: String,

    #[serde(default = "default_yuanqu_name")]
    pub yuanqu_name: String,
}

/// Connection state machine timing
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
}

/// Telemetry aggregation
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_latency_window")]
    pub latency_window: usize,

    #[serde(default = "default_wheel_circumference_m")]
    pub wheel_circumference_m: f64,

    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f64,

    #[serde(default = "default_withhold_power_until_voltage")]
    pub withhold_power_until_voltage: bool,
}

/// Recording configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RecordingConfig {
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_max_samples_in_memory")]
    pub max_samples_in_memory: usize,
}

/// Serial bridge transport configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default)]
    pub advertised_name: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub packet_details: bool,
}

// Default value functions
fn default_fardriver_name() -> String { "FarDriver".to_string() }
fn default_yuanqu_name() -> String { "YuanQuFOC982".to_string() }

fn default_scan_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 10000 }
fn default_settle_delay_ms() -> u64 { 500 }
fn default_keepalive_interval_ms() -> u64 { 2000 }
fn default_retry_delay_ms() -> u64 { 5000 }
fn default_stale_timeout_ms() -> u64 { 5000 }

fn default_history_capacity() -> usize { 1000 }
fn default_latency_window() -> usize { 100 }
fn default_wheel_circumference_m() -> f64 { 1.350 }
fn default_gear_ratio() -> f64 { 4.0 }
fn default_withhold_power_until_voltage() -> bool { true }

fn default_auto_save() -> bool { true }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_file_prefix() -> String { "eksr_data".to_string() }
fn default_max_samples_in_memory() -> usize { 100_000 }

fn default_baud_rate() -> u32 { 115_200 }

fn default_log_level() -> String { "info".to_string() }

/// Baud rates accepted for the serial bridge
const VALID_BAUD_RATES: [u32; 8] = [9600, 19200, 38400, 57600, 115_200, 230_400, 460_800, 921_600];

/// Accepted `logging.level` values
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            fardriver_name: default_fardriver_name(),
            yuanqu_name: default_yuanqu_name(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            stale_timeout_ms: default_stale_timeout_ms(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            latency_window: default_latency_window(),
            wheel_circumference_m: default_wheel_circumference_m(),
            gear_ratio: default_gear_ratio(),
            withhold_power_until_voltage: default_withhold_power_until_voltage(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            auto_save: default_auto_save(),
            data_dir: default_data_dir(),
            file_prefix: default_file_prefix(),
            max_samples_in_memory: default_max_samples_in_memory(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            advertised_name: None,
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            packet_details: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            session: SessionConfig::default(),
            telemetry: TelemetryConfig::default(),
            recording: RecordingConfig::default(),
            serial: SerialConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fardriver_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first out-of-range field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.fardriver_name.is_empty() {
            return Err(ConfigError::invalid("device.fardriver_name", "cannot be empty"));
        }

        if self.device.yuanqu_name.is_empty() {
            return Err(ConfigError::invalid("device.yuanqu_name", "cannot be empty"));
        }

        // Validate timing fields
        for (field, value) in [
            ("session.scan_timeout_ms", self.session.scan_timeout_ms),
            ("session.connect_timeout_ms", self.session.connect_timeout_ms),
            ("session.settle_delay_ms", self.session.settle_delay_ms),
            ("session.keepalive_interval_ms", self.session.keepalive_interval_ms),
            ("session.retry_delay_ms", self.session.retry_delay_ms),
            ("session.stale_timeout_ms", self.session.stale_timeout_ms),
        ] {
            if value == 0 || value > 60000 {
                return Err(ConfigError::invalid(field, "must be between 1 and 60000"));
            }
        }

        if self.telemetry.history_capacity == 0 || self.telemetry.history_capacity > 100_000 {
            return Err(ConfigError::invalid(
                "telemetry.history_capacity",
                "must be between 1 and 100000",
            ));
        }

        if self.telemetry.latency_window == 0 {
            return Err(ConfigError::invalid(
                "telemetry.latency_window",
                "must be greater than 0",
            ));
        }

        // NaN fails both comparisons, so test for the valid range
        if !(self.telemetry.wheel_circumference_m > 0.0) {
            return Err(ConfigError::invalid(
                "telemetry.wheel_circumference_m",
                "must be greater than 0.0",
            ));
        }

        if !(self.telemetry.gear_ratio > 0.0) {
            return Err(ConfigError::invalid(
                "telemetry.gear_ratio",
                "must be greater than 0.0",
            ));
        }

        if self.recording.auto_save && self.recording.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "recording.data_dir",
                "cannot be empty when auto_save is enabled",
            ));
        }

        if self.recording.file_prefix.is_empty() {
            return Err(ConfigError::invalid("recording.file_prefix", "cannot be empty"));
        }

        if self.recording.max_samples_in_memory == 0 {
            return Err(ConfigError::invalid(
                "recording.max_samples_in_memory",
                "must be greater than 0",
            ));
        }

        if matches!(self.serial.port.as_deref(), Some("")) {
            return Err(ConfigError::invalid("serial.port", "cannot be empty when set"));
        }

        if !VALID_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(ConfigError::invalid(
                "serial.baud_rate",
                format!("must be one of: {:?}", VALID_BAUD_RATES),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                "must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}

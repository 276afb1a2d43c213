//! # Error Types
//!
//! Custom error types for the telemetry link using `thiserror`.
//!
//! Every error below is recoverable: frame errors are counted and dropped,
//! transport errors feed the session's retry loop, recorder errors leave the
//! live link untouched, and configuration errors are returned to the caller
//! at the point the configuration is applied.

use std::path::PathBuf;

use thiserror::Error;

/// A frame that could not be accepted by the codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame is not exactly 16 bytes long
    #[error("Invalid packet length: {0} (expected 16)")]
    BadLength(usize),

    /// First byte is not the 0xAA header
    #[error("Invalid header: 0x{header:02X} (expected 0xAA) [{raw}]")]
    BadHeader {
        /// Header byte that was received
        header: u8,
        /// Hex dump of the rejected frame
        raw: String,
    },
}

/// Link-level failures, all handled by the session's retry loop
#[derive(Debug, Error)]
pub enum TransportError {
    /// Device enumeration failed
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Transport connect did not finish in time
    #[error("Connection timeout after {0} ms - device may be busy")]
    ConnectTimeout(u64),

    /// Transport connect failed
    #[error("Failed to connect to {device}: {reason}")]
    Connect {
        /// Device address
        device: String,
        /// Underlying failure
        reason: String,
    },

    /// Notification subscription failed
    #[error("Failed to subscribe to notifications: {0}")]
    Subscribe(String),

    /// Outbound write failed
    #[error("Failed to write to device: {0}")]
    Write(String),

    /// Operation requires an open link
    #[error("Not connected")]
    NotConnected,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Recording failures, never affecting the live link
#[derive(Debug, Error)]
pub enum RecorderError {
    /// `start` called while a session is recording
    #[error("Recording already active")]
    AlreadyActive,

    /// Persisted sink could not be opened
    #[error("Recording sink unavailable at {}: {source}", path.display())]
    SinkUnavailable {
        /// Target path
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// Writing a sample or export failed
    #[error("Recording I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON export failed
    #[error("JSON export error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of its valid range
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid {
        /// Dotted field name, e.g. `session.retry_delay_ms`
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main error type for the telemetry link
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Frame decoding errors
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Transport errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Recorder errors
    #[error(transparent)]
    Recorder(#[from] RecorderError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type alias for the telemetry link
pub type Result<T> = std::result::Result<T, MonitorError>;

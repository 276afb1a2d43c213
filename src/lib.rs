//! # FarDriver Telemetry Library
//!
//! Live telemetry from FarDriver (and YuanQu FOC) e-bike motor controllers.
//!
//! This library provides the core of a telemetry monitor: decoding the
//! controller's 16-byte notification frames, tracking last-known values with
//! change detection, keeping a packet history with statistics, recording
//! changes to CSV, and a connection session that scans, connects, keeps the
//! link alive and retries on its own.

pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod telemetry;

pub use config::Config;
pub use error::{MonitorError, Result};
pub use session::{ConnectionSession, ConnectionState, Transport};
pub use telemetry::{RecordTarget, TelemetrySnapshot};

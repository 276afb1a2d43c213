//! # Recorder
//!
//! Timestamped samples of the telemetry snapshot, one per change.
//!
//! Samples are kept in memory (bounded, oldest dropped first) and, when a
//! sink is attached, appended and flushed to it synchronously. A sink that
//! fails mid-session is detached and recording continues in memory.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info, warn};

use super::metrics::PerformanceMetrics;
use super::sink::{self, ExportFormat, SampleSink};
use super::store::TelemetrySnapshot;
use crate::error::RecorderError;

/// Default bound on in-memory samples
pub const DEFAULT_MAX_SAMPLES: usize = 100_000;

/// One recorded row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub throttle: u16,
    pub gear: u8,
    pub rpm: u16,
    pub controller_temp: u8,
    pub motor_temp: u8,
    pub speed: f64,
    pub power: f64,
    pub voltage: f64,
    pub packet_count: u64,
    pub latency_ms: f64,
}

impl Sample {
    pub fn new(
        snapshot: &TelemetrySnapshot,
        packet_count: u64,
        latency_ms: f64,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            timestamp,
            throttle: snapshot.throttle,
            gear: snapshot.gear,
            rpm: snapshot.rpm,
            controller_temp: snapshot.controller_temp,
            motor_temp: snapshot.motor_temp,
            speed: snapshot.speed,
            power: snapshot.power,
            voltage: snapshot.voltage,
            packet_count,
            latency_ms,
        }
    }
}

/// Recording session state
pub struct Recorder {
    active: bool,
    started_at: Option<DateTime<Local>>,
    samples: VecDeque<Sample>,
    max_samples: usize,
    sink: Option<Box<dyn SampleSink>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SAMPLES)
    }
}

impl Recorder {
    pub fn new(max_samples: usize) -> Self {
        Self {
            active: false,
            started_at: None,
            samples: VecDeque::new(),
            max_samples: max_samples.max(1),
            sink: None,
        }
    }

    /// Begin a new session, discarding the previous session's samples
    ///
    /// # Errors
    ///
    /// * `AlreadyActive` if a session is running
    /// * `Io` if the sink rejects the header row
    pub fn start(&mut self, sink: Option<Box<dyn SampleSink>>) -> Result<(), RecorderError> {
        if self.active {
            return Err(RecorderError::AlreadyActive);
        }

        let sink = match sink {
            Some(mut sink) => {
                sink.write_header()?;
                info!("Recording to {}", sink.describe());
                Some(sink)
            }
            None => {
                info!("Recording in memory only");
                None
            }
        };

        self.sink = sink;
        self.samples.clear();
        self.started_at = Some(Local::now());
        self.active = true;
        Ok(())
    }

    /// End the session and close the sink
    ///
    /// Returns the number of samples held in memory. Stopping an inactive
    /// recorder is a no-op.
    pub fn stop(&mut self) -> usize {
        if !self.active {
            return self.samples.len();
        }

        self.active = false;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!("Failed to close recording {}: {}", sink.describe(), e);
            }
        }

        info!("Recording stopped with {} samples", self.samples.len());
        self.samples.len()
    }

    /// Record one sample for a telemetry change
    pub fn on_change(&mut self, snapshot: &TelemetrySnapshot, metrics: &PerformanceMetrics) {
        if !self.active {
            return;
        }

        let sample = Sample::new(
            snapshot,
            metrics.packet_count(),
            metrics.avg_latency_ms(),
            Local::now(),
        );

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.append(&sample) {
                error!(
                    "Recording write to {} failed, continuing in memory: {}",
                    sink.describe(),
                    e
                );
                self.sink = None;
            }
        }

        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether samples are currently going to a sink
    pub fn is_persisting(&self) -> bool {
        self.sink.is_some()
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    /// Samples of the current (or last) session
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().cloned().collect()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Write the in-memory samples to `path` as CSV or JSON
    pub fn export(&self, path: &Path) -> Result<usize, RecorderError> {
        let samples = self.samples();
        match ExportFormat::from_path(path) {
            ExportFormat::Json => sink::write_json(path, &samples)?,
            ExportFormat::Csv => sink::write_csv(path, &samples)?,
        }

        info!("Exported {} samples to {}", samples.len(), path.display());
        Ok(samples.len())
    }
}

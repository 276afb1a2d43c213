//! # Telemetry Module
//!
//! Everything that happens to a frame after the transport delivers it.
//!
//! This module handles:
//! - Applying decoded packets to the last-known values ([`store`])
//! - Keeping a bounded packet history with statistics ([`history`])
//! - Link performance counters ([`metrics`])
//! - Recording changes to memory and CSV ([`recorder`], [`sink`])
//!
//! [`Telemetry`] ties them together behind short-lived locks so the session
//! worker can write while any number of observers read consistent copies.

pub mod history;
pub mod metrics;
pub mod recorder;
pub mod sink;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{RecordingConfig, TelemetryConfig};
use crate::error::RecorderError;
use crate::protocol::{decode, DecodedPacket, Payload};

pub use history::{PacketHistory, Stats};
pub use metrics::{PerformanceMetrics, PerformanceStats};
pub use recorder::{Recorder, Sample};
pub use sink::{CsvFileSink, SampleSink};
pub use store::{ChangeSet, Field, TelemetrySnapshot, TelemetryStore};

/// Where a new recording should go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordTarget {
    /// A timestamped file in the data directory when auto-save is on,
    /// memory only otherwise
    Default,
    /// Memory only
    MemoryOnly,
    /// A named file (bare names are placed in the data directory)
    File(PathBuf),
}

/// Shared telemetry state for one link
pub struct Telemetry {
    store: Mutex<TelemetryStore>,
    history: Mutex<PacketHistory>,
    metrics: Mutex<PerformanceMetrics>,
    recorder: Mutex<Recorder>,
    last_frame: Mutex<Option<Instant>>,
    recording: RecordingConfig,
    packet_details: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Telemetry {
    pub fn new(telemetry: &TelemetryConfig, recording: &RecordingConfig) -> Self {
        Self {
            store: Mutex::new(TelemetryStore::new(telemetry)),
            history: Mutex::new(PacketHistory::new(telemetry.history_capacity)),
            metrics: Mutex::new(PerformanceMetrics::new(telemetry.latency_window)),
            recorder: Mutex::new(Recorder::new(recording.max_samples_in_memory)),
            last_frame: Mutex::new(None),
            recording: recording.clone(),
            packet_details: false,
        }
    }

    /// Log every decoded packet at debug level
    pub fn with_packet_details(mut self, enabled: bool) -> Self {
        self.packet_details = enabled;
        self
    }

    /// Run one inbound frame through decode, store, history and recorder
    ///
    /// Rejected frames are logged, counted and kept in the history; they
    /// never fail the caller.
    pub fn ingest(&self, frame: &[u8]) {
        let received_at = Instant::now();
        let started = std::time::Instant::now();

        let packet = match decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                lock(&self.metrics).record_error();
                lock(&self.history).record(DecodedPacket::rejected(frame, e, Local::now()));
                return;
            }
        };

        if self.packet_details {
            debug!("RX [{}] {}", packet.raw_hex(), packet.payload);
        } else {
            trace!("RX [{}]", packet.raw_hex());
        }
        if let (Payload::Unknown, Some(index)) = (&packet.payload, packet.type_index) {
            warn!("Unknown packet type: {}", index);
        }
        if !packet.checksum_valid {
            debug!(
                "Checksum mismatch on type {:?}: got 0x{:02X}, expected 0x{:02X}",
                packet.type_index, packet.checksum, packet.expected_checksum
            );
        }

        let (changes, snapshot) = {
            let mut store = lock(&self.store);
            let changes = store.apply_packet(&packet);
            (changes, store.snapshot())
        };
        lock(&self.history).record(packet);
        *lock(&self.last_frame) = Some(received_at);

        let mut metrics = lock(&self.metrics);
        metrics.record_packet(started.elapsed(), received_at);
        if !changes.is_empty() {
            lock(&self.recorder).on_change(&snapshot, &metrics);
        }
    }

    /// Copy of the current values
    pub fn snapshot(&self) -> TelemetrySnapshot {
        lock(&self.store).snapshot()
    }

    /// Return and clear the changed flag
    pub fn consume_changed(&self) -> bool {
        lock(&self.store).consume_changed()
    }

    /// The `n` most recent packets, oldest first
    pub fn recent_packets(&self, n: usize) -> Vec<DecodedPacket> {
        lock(&self.history).recent(n)
    }

    pub fn stats(&self) -> Stats {
        lock(&self.history).stats()
    }

    pub fn performance(&self) -> PerformanceStats {
        lock(&self.metrics).stats()
    }

    /// A link has just come up: restart the staleness and rate clocks
    pub fn mark_link_up(&self) {
        *lock(&self.last_frame) = Some(Instant::now());
        lock(&self.metrics).reset_link();
    }

    /// The link is gone: zero every value and signal the change
    pub fn reset(&self) {
        let snapshot = {
            let mut store = lock(&self.store);
            store.reset();
            store.snapshot()
        };
        *lock(&self.last_frame) = None;

        let metrics = lock(&self.metrics);
        lock(&self.recorder).on_change(&snapshot, &metrics);
    }

    /// Time since the last accepted frame (or since the link came up)
    pub fn last_frame_age(&self) -> Option<Duration> {
        lock(&self.last_frame).map(|at| at.elapsed())
    }

    /// Start a recording session
    ///
    /// Returns the file path when the recording is persisted.
    ///
    /// # Errors
    ///
    /// * `AlreadyActive` if a recording is running
    /// * `SinkUnavailable` if the file cannot be created; callers may retry
    ///   with [`RecordTarget::MemoryOnly`]
    pub fn start_recording(&self, target: RecordTarget) -> Result<Option<PathBuf>, RecorderError> {
        let mut recorder = lock(&self.recorder);
        if recorder.is_active() {
            return Err(RecorderError::AlreadyActive);
        }

        let path = match target {
            RecordTarget::MemoryOnly => None,
            RecordTarget::Default if !self.recording.auto_save => None,
            RecordTarget::Default => Some(sink::resolve_recording_path(
                &self.recording,
                None,
                Local::now(),
            )),
            RecordTarget::File(name) => Some(sink::resolve_recording_path(
                &self.recording,
                Some(&name),
                Local::now(),
            )),
        };

        let sink = match &path {
            Some(path) => Some(Box::new(CsvFileSink::create(path)?) as Box<dyn SampleSink>),
            None => None,
        };

        recorder.start(sink)?;
        Ok(path)
    }

    /// Stop recording, returning the number of samples in memory
    pub fn stop_recording(&self) -> usize {
        lock(&self.recorder).stop()
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.recorder).is_active()
    }

    /// Samples of the current (or last) recording
    pub fn recorded_samples(&self) -> Vec<Sample> {
        lock(&self.recorder).samples()
    }

    /// Export the current (or last) recording to CSV or JSON
    pub fn export_recording(&self, path: &Path) -> Result<usize, RecorderError> {
        lock(&self.recorder).export(path)
    }
}

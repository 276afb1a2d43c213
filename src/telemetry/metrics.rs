//! Link performance counters and a sliding latency window.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Default latency window length
pub const DEFAULT_LATENCY_WINDOW: usize = 100;

/// Point-in-time performance figures
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    /// Frames accepted by the codec
    pub packet_count: u64,

    /// Frames rejected by the codec
    pub packet_errors: u64,

    /// Mean processing latency over the window, in milliseconds
    pub avg_latency_ms: f64,

    /// `packet_errors / max(1, packet_count)`
    pub error_rate: f64,

    /// Accepted frames per second since the first frame of the current link
    pub packet_rate: f64,
}

/// Counters updated on every frame
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    packet_count: u64,
    packet_errors: u64,
    latencies_ms: VecDeque<f64>,
    window: usize,
    avg_latency_ms: f64,
    /// Accepted frames on the current link
    link_packets: u64,
    first_packet: Option<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl PerformanceMetrics {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            packet_count: 0,
            packet_errors: 0,
            latencies_ms: VecDeque::with_capacity(window),
            window,
            avg_latency_ms: 0.0,
            link_packets: 0,
            first_packet: None,
        }
    }

    /// Count an accepted frame and its processing latency
    pub fn record_packet(&mut self, latency: Duration, received_at: Instant) {
        self.packet_count += 1;
        self.link_packets += 1;
        self.first_packet.get_or_insert(received_at);

        if self.latencies_ms.len() >= self.window {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
        self.avg_latency_ms =
            self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64;
    }

    /// Count a rejected frame
    pub fn record_error(&mut self) {
        self.packet_errors += 1;
    }

    /// Restart the packet rate clock for a new link
    pub fn reset_link(&mut self) {
        self.link_packets = 0;
        self.first_packet = None;
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.avg_latency_ms
    }

    pub fn stats(&self) -> PerformanceStats {
        let elapsed = self
            .first_packet
            .map(|first| first.elapsed().as_secs_f64())
            .unwrap_or_default();

        PerformanceStats {
            packet_count: self.packet_count,
            packet_errors: self.packet_errors,
            avg_latency_ms: self.avg_latency_ms,
            error_rate: self.packet_errors as f64 / self.packet_count.max(1) as f64,
            packet_rate: if elapsed > 0.0 {
                self.link_packets as f64 / elapsed
            } else {
                0.0
            },
        }
    }
}

//! # Packet History
//!
//! Fixed-capacity FIFO of decoded packets with aggregate statistics.
//!
//! Counters are maintained incrementally: incremented on insert and
//! decremented when the oldest packet is evicted, so [`PacketHistory::stats`]
//! always describes exactly the packets currently retained.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::protocol::DecodedPacket;

/// Default number of packets retained
pub const DEFAULT_CAPACITY: usize = 1000;

/// Aggregate statistics over the retained packets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    /// Packets retained (valid and rejected)
    pub total: usize,

    /// Packets that passed length and header validation
    pub valid: usize,

    /// Valid packets whose checksum did not match
    pub checksum_errors: usize,

    /// Valid packets per type index
    pub distribution: BTreeMap<u8, usize>,

    /// `checksum_errors / total`, 0 when empty
    pub error_rate: f64,
}

/// Ring buffer of decoded packets
#[derive(Debug, Clone)]
pub struct PacketHistory {
    packets: VecDeque<DecodedPacket>,
    capacity: usize,
    valid: usize,
    checksum_errors: usize,
    distribution: BTreeMap<u8, usize>,
}

impl Default for PacketHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PacketHistory {
    /// Create a history holding at most `capacity` packets (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
            valid: 0,
            checksum_errors: 0,
            distribution: BTreeMap::new(),
        }
    }

    /// Append a packet, evicting the oldest once full
    pub fn record(&mut self, packet: DecodedPacket) {
        if self.packets.len() >= self.capacity {
            if let Some(evicted) = self.packets.pop_front() {
                self.uncount(&evicted);
            }
        }

        self.count(&packet);
        self.packets.push_back(packet);
    }

    /// Statistics over the retained packets
    pub fn stats(&self) -> Stats {
        let total = self.packets.len();
        Stats {
            total,
            valid: self.valid,
            checksum_errors: self.checksum_errors,
            distribution: self.distribution.clone(),
            error_rate: if total > 0 {
                self.checksum_errors as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// The `n` most recent packets, oldest first
    pub fn recent(&self, n: usize) -> Vec<DecodedPacket> {
        let skip = self.packets.len().saturating_sub(n);
        self.packets.iter().skip(skip).cloned().collect()
    }

    /// Most recent packet
    pub fn latest(&self) -> Option<&DecodedPacket> {
        self.packets.back()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.valid = 0;
        self.checksum_errors = 0;
        self.distribution.clear();
    }

    fn count(&mut self, packet: &DecodedPacket) {
        let Some(type_index) = packet.type_index.filter(|_| packet.valid) else {
            return;
        };

        self.valid += 1;
        *self.distribution.entry(type_index).or_insert(0) += 1;
        if !packet.checksum_valid {
            self.checksum_errors += 1;
        }
    }

    fn uncount(&mut self, packet: &DecodedPacket) {
        let Some(type_index) = packet.type_index.filter(|_| packet.valid) else {
            return;
        };

        self.valid -= 1;
        if let Some(count) = self.distribution.get_mut(&type_index) {
            *count -= 1;
            if *count == 0 {
                self.distribution.remove(&type_index);
            }
        }
        if !packet.checksum_valid {
            self.checksum_errors -= 1;
        }
    }
}

//! # FarDriver Frame Constants and Types
//!
//! Core definitions for the 16-byte notification frame.
//!
//! ```text
//! Byte 0      Header (always 0xAA)
//! Byte 1      Type index
//! Bytes 2-13  Type-specific payload
//! Byte 14     Checksum (XOR of bytes 1-13)
//! Byte 15     Reserved
//! ```

use std::fmt;
use std::ops::Range;

use bytes::Bytes;
use chrono::{DateTime, Local};

use crate::error::FrameError;

/// Frame header byte (always 0xAA)
pub const FRAME_HEADER: u8 = 0xAA;

/// Exact frame length
pub const FRAME_LENGTH: usize = 16;

/// Offset of the type index byte
pub const TYPE_INDEX: usize = 1;

/// Payload bytes (2..=13)
pub const PAYLOAD_RANGE: Range<usize> = 2..14;

/// Payload length
pub const PAYLOAD_LENGTH: usize = 12;

/// Bytes covered by the checksum (type index + payload)
pub const CHECKSUM_RANGE: Range<usize> = 1..14;

/// Offset of the checksum byte
pub const CHECKSUM_INDEX: usize = 14;

/// Offset of the reserved byte
pub const RESERVED_INDEX: usize = 15;

/// Main data: gear, RPM, phase currents
pub const TYPE_MAIN_DATA: u8 = 0;

/// Battery voltage
pub const TYPE_VOLTAGE: u8 = 1;

/// Controller temperature
pub const TYPE_CONTROLLER_TEMP: u8 = 4;

/// Motor temperature and throttle
pub const TYPE_MOTOR_THROTTLE: u8 = 13;

/// Full-scale raw throttle reading (12-bit ADC)
pub const THROTTLE_FULL_SCALE: f64 = 4095.0;

/// Keepalive written to the controller to hold the link open
pub const KEEPALIVE_FRAME: [u8; 8] = [0xAA, 0x13, 0xEC, 0x07, 0x01, 0xF1, 0xA2, 0x5D];

/// Selected gear, from bits 2-3 of byte 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gear {
    High,
    Mid,
    Low,
}

impl Gear {
    /// Map the two gear bits onto a gear. Both 1 and 3 mean `Mid`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Gear::High,
            2 => Gear::Low,
            _ => Gear::Mid,
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Gear::High => "High",
            Gear::Mid => "Mid",
            Gear::Low => "Low",
        };
        f.write_str(label)
    }
}

/// Type 0 payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainData {
    /// Raw gear bits (0-3)
    pub gear_bits: u8,

    /// Gear label
    pub gear: Gear,

    /// Motor RPM
    pub rpm: u16,

    /// Torque-producing (q-axis) current in amperes
    pub iq: f64,

    /// Flux-producing (d-axis) current in amperes
    pub id: f64,

    /// Phase current magnitude, sqrt(iq² + id²)
    pub current_magnitude: f64,
}

impl MainData {
    /// Gear as a number in 1..=3, as shown to the rider
    pub fn gear_number(&self) -> u8 {
        self.gear_bits.clamp(1, 3)
    }
}

/// Type 1 payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageData {
    /// Raw reading in decivolts
    pub raw: u16,

    /// Battery voltage in volts
    pub voltage: f64,
}

/// Type 4 payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerTempData {
    /// Controller temperature in °C
    pub temperature: u8,
}

/// Type 13 payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorThrottleData {
    /// Motor temperature in °C
    pub motor_temperature: u8,

    /// Raw 12-bit throttle reading
    pub throttle_raw: u16,

    /// Throttle position, 0-100 %
    pub throttle_percent: f64,
}

/// Decoded payload, selected by the type index
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    MainData(MainData),
    Voltage(VoltageData),
    ControllerTemp(ControllerTempData),
    MotorThrottle(MotorThrottleData),
    /// Type index without a known schema; payload left as raw bytes
    Unknown,
    /// Frame failed length or header validation
    Rejected(FrameError),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::MainData(m) => write!(
                f,
                "gear={} ({:#04b}) rpm={} iq={:.2}A id={:.2}A |I|={:.2}A",
                m.gear, m.gear_bits, m.rpm, m.iq, m.id, m.current_magnitude
            ),
            Payload::Voltage(v) => write!(f, "voltage={:.1}V (raw {})", v.voltage, v.raw),
            Payload::ControllerTemp(t) => write!(f, "controller_temp={}°C", t.temperature),
            Payload::MotorThrottle(m) => write!(
                f,
                "motor_temp={}°C throttle={} ({:.1}%)",
                m.motor_temperature, m.throttle_raw, m.throttle_percent
            ),
            Payload::Unknown => f.write_str("unknown type"),
            Payload::Rejected(e) => write!(f, "rejected: {}", e),
        }
    }
}

/// One frame as seen by the codec
///
/// Produced once per received frame and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    /// Type index; `None` for rejected frames
    pub type_index: Option<u8>,

    /// Frame passed length and header validation
    pub valid: bool,

    /// Byte 14 matched the XOR of bytes 1-13
    pub checksum_valid: bool,

    /// Checksum carried by the frame
    pub checksum: u8,

    /// Checksum computed over bytes 1-13
    pub expected_checksum: u8,

    /// Raw frame bytes as received
    pub raw: Bytes,

    /// Decoded fields
    pub payload: Payload,

    /// Receive time
    pub timestamp: DateTime<Local>,
}

impl DecodedPacket {
    /// Diagnostic entry for a frame the codec refused
    pub fn rejected(raw: &[u8], error: FrameError, timestamp: DateTime<Local>) -> Self {
        Self {
            type_index: None,
            valid: false,
            checksum_valid: false,
            checksum: 0,
            expected_checksum: 0,
            raw: Bytes::copy_from_slice(raw),
            payload: Payload::Rejected(error),
            timestamp,
        }
    }

    /// Reserved trailer byte, if the frame was complete
    pub fn reserved(&self) -> Option<u8> {
        if self.valid {
            self.raw.get(RESERVED_INDEX).copied()
        } else {
            None
        }
    }

    /// Raw payload bytes (2-13) of an accepted frame
    pub fn payload_bytes(&self) -> Option<&[u8]> {
        if self.valid {
            self.raw.get(PAYLOAD_RANGE)
        } else {
            None
        }
    }

    /// Hex dump of the raw frame
    pub fn raw_hex(&self) -> String {
        super::hex_dump(&self.raw)
    }
}

//! # FarDriver Protocol Module
//!
//! Implementation of the fixed 16-byte FarDriver notification frame.
//!
//! This module handles:
//! - Frame validation (length, 0xAA header)
//! - XOR checksum calculation and verification
//! - Per-type payload decoding (main data, voltage, temperatures, throttle)
//! - Frame encoding for keepalives and synthetic data

pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod frame;

pub use decoder::{decode, decode_at};
pub use frame::{DecodedPacket, Gear, Payload};

/// Format bytes as space separated upper-case hex, e.g. `AA 00 04`
///
/// This is the exact layout the controller tooling prints frames in, so
/// logged frames can be compared byte for byte.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_dump_format() {
        assert_eq!(hex_dump(&[0xAA, 0x00, 0x0F]), "AA 00 0F");
    }

    #[test]
    fn test_hex_dump_empty() {
        assert_eq!(hex_dump(&[]), "");
    }
}

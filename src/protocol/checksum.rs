//! # XOR Checksum
//!
//! Frame integrity byte used by FarDriver controllers.
//!
//! **Coverage**: bytes 1..=13 (type index + 12-byte payload)
//! **Location**: byte 14
//!
//! A mismatch is informational only. Frames are still decoded and the
//! mismatch is flagged on the resulting packet.

use super::frame::{CHECKSUM_INDEX, CHECKSUM_RANGE, FRAME_LENGTH};

/// XOR all bytes together
///
/// # Examples
///
/// ```
/// use fardriver_telemetry::protocol::checksum::xor_checksum;
///
/// assert_eq!(xor_checksum(&[0x01, 0x02, 0x04]), 0x07);
/// ```
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Checksum a frame should carry at byte 14
pub fn expected_checksum(frame: &[u8; FRAME_LENGTH]) -> u8 {
    xor_checksum(&frame[CHECKSUM_RANGE])
}

/// Whether byte 14 matches the XOR of bytes 1..=13
pub fn verify(frame: &[u8; FRAME_LENGTH]) -> bool {
    expected_checksum(frame) == frame[CHECKSUM_INDEX]
}

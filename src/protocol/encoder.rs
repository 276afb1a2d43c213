//! # FarDriver Frame Encoder
//!
//! Builds 16-byte frames with a correct checksum. Used for synthetic
//! telemetry (replays, bench rigs, tests) and exposes the keepalive frame.

use super::checksum::xor_checksum;
use super::frame::*;

/// Encode a frame from a type index and a 12-byte payload
///
/// The reserved byte is left at zero.
///
/// # Examples
///
/// ```
/// use fardriver_telemetry::protocol::encoder::encode_frame;
///
/// let frame = encode_frame(1, &[0x03, 0x84, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
/// assert_eq!(frame[0], 0xAA);
/// assert_eq!(frame[14], 0x01 ^ 0x03 ^ 0x84);
/// ```
pub fn encode_frame(type_index: u8, payload: &[u8; PAYLOAD_LENGTH]) -> [u8; FRAME_LENGTH] {
    let mut frame = [0u8; FRAME_LENGTH];
    frame[0] = FRAME_HEADER;
    frame[TYPE_INDEX] = type_index;
    frame[PAYLOAD_RANGE].copy_from_slice(payload);
    frame[CHECKSUM_INDEX] = xor_checksum(&frame[CHECKSUM_RANGE]);
    frame
}

/// Encode a type 0 frame
///
/// # Arguments
///
/// * `gear_bits` - Gear selector (0-3), placed in bits 2-3 of byte 2
/// * `rpm` - Motor RPM
/// * `iq_raw` - q-axis current in centiamps
/// * `id_raw` - d-axis current in centiamps
pub fn encode_main_data(gear_bits: u8, rpm: u16, iq_raw: u16, id_raw: u16) -> [u8; FRAME_LENGTH] {
    let mut payload = [0u8; PAYLOAD_LENGTH];
    payload[0] = (gear_bits & 0x03) << 2;
    payload[2..4].copy_from_slice(&rpm.to_be_bytes());
    payload[6..8].copy_from_slice(&iq_raw.to_be_bytes());
    payload[8..10].copy_from_slice(&id_raw.to_be_bytes());
    encode_frame(TYPE_MAIN_DATA, &payload)
}

/// Encode a type 1 frame from a reading in decivolts
pub fn encode_voltage(decivolts: u16) -> [u8; FRAME_LENGTH] {
    let mut payload = [0u8; PAYLOAD_LENGTH];
    payload[0..2].copy_from_slice(&decivolts.to_be_bytes());
    encode_frame(TYPE_VOLTAGE, &payload)
}

/// Encode a type 4 frame
pub fn encode_controller_temp(celsius: u8) -> [u8; FRAME_LENGTH] {
    let mut payload = [0u8; PAYLOAD_LENGTH];
    payload[0] = celsius;
    encode_frame(TYPE_CONTROLLER_TEMP, &payload)
}

/// Encode a type 13 frame
pub fn encode_motor_throttle(motor_celsius: u8, throttle_raw: u16) -> [u8; FRAME_LENGTH] {
    let mut payload = [0u8; PAYLOAD_LENGTH];
    payload[0] = motor_celsius;
    payload[2..4].copy_from_slice(&throttle_raw.to_be_bytes());
    encode_frame(TYPE_MOTOR_THROTTLE, &payload)
}

/// Keepalive bytes written every keepalive interval while the link is active
pub fn keepalive_frame() -> &'static [u8] {
    &KEEPALIVE_FRAME
}

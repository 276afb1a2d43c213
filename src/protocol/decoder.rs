//! # FarDriver Frame Decoder
//!
//! Validates a 16-byte frame and decodes its payload into physical units.
//!
//! Decoding is a pure function of the input bytes (plus the receive time
//! for [`decode_at`]), so every rule here is covered by plain unit tests.

use bytes::Bytes;
use chrono::{DateTime, Local};

use super::checksum::expected_checksum;
use super::frame::*;
use super::hex_dump;
use crate::error::FrameError;

/// Decode a frame received now
///
/// # Errors
///
/// - [`FrameError::BadLength`] if the frame is not exactly 16 bytes
/// - [`FrameError::BadHeader`] if byte 0 is not 0xAA
///
/// A checksum mismatch is not an error; see [`DecodedPacket::checksum_valid`].
pub fn decode(frame: &[u8]) -> Result<DecodedPacket, FrameError> {
    decode_at(frame, Local::now())
}

/// Decode a frame with an explicit receive time
///
/// # Examples
///
/// ```
/// use fardriver_telemetry::protocol::{decode_at, Payload};
/// use fardriver_telemetry::protocol::encoder::encode_voltage;
///
/// let frame = encode_voltage(900);
/// let packet = decode_at(&frame, chrono::Local::now()).unwrap();
///
/// match packet.payload {
///     Payload::Voltage(v) => assert_eq!(v.voltage, 90.0),
///     other => panic!("unexpected payload: {:?}", other),
/// }
/// ```
pub fn decode_at(frame: &[u8], timestamp: DateTime<Local>) -> Result<DecodedPacket, FrameError> {
    let Ok(bytes) = <&[u8; FRAME_LENGTH]>::try_from(frame) else {
        return Err(FrameError::BadLength(frame.len()));
    };

    if bytes[0] != FRAME_HEADER {
        return Err(FrameError::BadHeader {
            header: bytes[0],
            raw: hex_dump(frame),
        });
    }

    let type_index = bytes[TYPE_INDEX];
    let checksum = bytes[CHECKSUM_INDEX];
    let expected = expected_checksum(bytes);

    let payload = match type_index {
        TYPE_MAIN_DATA => Payload::MainData(decode_main_data(bytes)),
        TYPE_VOLTAGE => Payload::Voltage(decode_voltage(bytes)),
        TYPE_CONTROLLER_TEMP => Payload::ControllerTemp(decode_controller_temp(bytes)),
        TYPE_MOTOR_THROTTLE => Payload::MotorThrottle(decode_motor_throttle(bytes)),
        _ => Payload::Unknown,
    };

    Ok(DecodedPacket {
        type_index: Some(type_index),
        valid: true,
        checksum_valid: checksum == expected,
        checksum,
        expected_checksum: expected,
        raw: Bytes::copy_from_slice(frame),
        payload,
        timestamp,
    })
}

/// Decode a type 0 (main data) frame
///
/// RPM and both currents are big-endian 16-bit unsigned values; currents
/// are in centiamps.
pub fn decode_main_data(frame: &[u8; FRAME_LENGTH]) -> MainData {
    let gear_bits = (frame[2] >> 2) & 0x03;
    let rpm = u16::from_be_bytes([frame[4], frame[5]]);
    let iq = u16::from_be_bytes([frame[8], frame[9]]) as f64 / 100.0;
    let id = u16::from_be_bytes([frame[10], frame[11]]) as f64 / 100.0;

    MainData {
        gear_bits,
        gear: Gear::from_bits(gear_bits),
        rpm,
        iq,
        id,
        current_magnitude: (iq * iq + id * id).sqrt(),
    }
}

/// Decode a type 1 (voltage) frame: decivolts, big-endian
pub fn decode_voltage(frame: &[u8; FRAME_LENGTH]) -> VoltageData {
    let raw = u16::from_be_bytes([frame[2], frame[3]]);
    VoltageData {
        raw,
        voltage: raw as f64 / 10.0,
    }
}

/// Decode a type 4 (controller temperature) frame: raw byte in °C
pub fn decode_controller_temp(frame: &[u8; FRAME_LENGTH]) -> ControllerTempData {
    ControllerTempData {
        temperature: frame[2],
    }
}

/// Decode a type 13 (motor temperature / throttle) frame
pub fn decode_motor_throttle(frame: &[u8; FRAME_LENGTH]) -> MotorThrottleData {
    let throttle_raw = u16::from_be_bytes([frame[4], frame[5]]);
    MotorThrottleData {
        motor_temperature: frame[2],
        throttle_raw,
        throttle_percent: throttle_raw as f64 / THROTTLE_FULL_SCALE * 100.0,
    }
}

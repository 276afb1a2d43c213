//! # Telemetry Store
//!
//! Last-known controller values with change tracking.
//!
//! Each field update is a compare-and-set: a field is only marked changed
//! when its new value differs from the stored one (floats are compared
//! bitwise). Speed and power are derived from type 0 packets; power uses
//! whatever voltage the store holds at that moment.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::TelemetryConfig;
use crate::protocol::frame::{MainData, THROTTLE_FULL_SCALE};
use crate::protocol::{DecodedPacket, Payload};

/// Minutes-per-hour / meters-per-kilometer folded into one factor
const SPEED_FACTOR: f64 = 0.06;

/// Battery voltage shown as empty
pub const BATTERY_EMPTY_V: f64 = 84.0;

/// Battery voltage shown as full
pub const BATTERY_FULL_V: f64 = 96.0;

/// One telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Throttle,
    Gear,
    Rpm,
    ControllerTemp,
    MotorTemp,
    Speed,
    Power,
    Voltage,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Throttle,
        Field::Gear,
        Field::Rpm,
        Field::ControllerTemp,
        Field::MotorTemp,
        Field::Speed,
        Field::Power,
        Field::Voltage,
    ];

    fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// Set of fields changed by one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet(u16);

impl ChangeSet {
    /// Every field, used when values are force-reset
    pub fn all() -> Self {
        Field::ALL.iter().fold(Self::default(), |mut set, &field| {
            set.insert(field);
            set
        })
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|field| self.contains(*field))
    }
}

/// Copy of the current controller values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Raw 12-bit throttle reading
    pub throttle: u16,

    /// Gear, 1-3 (0 when no data)
    pub gear: u8,

    /// Motor RPM
    pub rpm: u16,

    /// Controller temperature in °C
    pub controller_temp: u8,

    /// Motor temperature in °C
    pub motor_temp: u8,

    /// Road speed in km/h
    pub speed: f64,

    /// Electrical power in W (sign follows the controller's convention)
    pub power: f64,

    /// Battery voltage in V
    pub voltage: f64,

    /// Time of the last value change
    pub last_update: Option<DateTime<Local>>,
}

impl TelemetrySnapshot {
    /// Throttle position, 0-100 %
    pub fn throttle_percent(&self) -> f64 {
        self.throttle as f64 / THROTTLE_FULL_SCALE * 100.0
    }

    /// Battery charge estimate in 0.0..=1.0 from the current voltage
    pub fn battery_level(&self) -> f64 {
        let voltage = self.voltage.clamp(BATTERY_EMPTY_V, BATTERY_FULL_V);
        (voltage - BATTERY_EMPTY_V) / (BATTERY_FULL_V - BATTERY_EMPTY_V)
    }
}

/// Last-known values plus an edge-triggered "changed" flag
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    snapshot: TelemetrySnapshot,
    /// Fields written at least once since the last reset
    seen: ChangeSet,
    changed: bool,
    voltage_seen: bool,
    wheel_circumference_m: f64,
    gear_ratio: f64,
    withhold_power_until_voltage: bool,
}

impl TelemetryStore {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            snapshot: TelemetrySnapshot::default(),
            seen: ChangeSet::default(),
            changed: false,
            voltage_seen: false,
            wheel_circumference_m: config.wheel_circumference_m,
            gear_ratio: config.gear_ratio,
            withhold_power_until_voltage: config.withhold_power_until_voltage,
        }
    }

    /// Apply one decoded packet and report which fields moved
    ///
    /// Rejected and unknown-type packets change nothing.
    pub fn apply_packet(&mut self, packet: &DecodedPacket) -> ChangeSet {
        let mut changes = ChangeSet::default();

        match &packet.payload {
            Payload::MainData(main) => {
                let speed = self.speed_kmh(main.rpm);
                self.set(Field::Rpm, |s| &mut s.rpm, main.rpm, &mut changes);
                self.set(Field::Gear, |s| &mut s.gear, main.gear_number(), &mut changes);

                if self.voltage_seen || !self.withhold_power_until_voltage {
                    let power = power_watts(main, self.snapshot.voltage);
                    self.set_f64(Field::Power, |s| &mut s.power, power, &mut changes);
                }

                self.set_f64(Field::Speed, |s| &mut s.speed, speed, &mut changes);
            }
            Payload::Voltage(v) => {
                self.voltage_seen = true;
                self.set_f64(Field::Voltage, |s| &mut s.voltage, v.voltage, &mut changes);
            }
            Payload::ControllerTemp(t) => {
                self.set(
                    Field::ControllerTemp,
                    |s| &mut s.controller_temp,
                    t.temperature,
                    &mut changes,
                );
            }
            Payload::MotorThrottle(m) => {
                self.set(Field::MotorTemp, |s| &mut s.motor_temp, m.motor_temperature, &mut changes);
                self.set(Field::Throttle, |s| &mut s.throttle, m.throttle_raw, &mut changes);
            }
            Payload::Unknown | Payload::Rejected(_) => {}
        }

        if !changes.is_empty() {
            self.changed = true;
            self.snapshot.last_update = Some(packet.timestamp);
        }

        changes
    }

    /// Copy of the current values
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.clone()
    }

    /// Return and clear the changed flag
    ///
    /// Only one caller observes `true` per change.
    pub fn consume_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    /// Zero every value and force a change, used when the link drops
    pub fn reset(&mut self) {
        self.snapshot = TelemetrySnapshot {
            last_update: Some(Local::now()),
            ..TelemetrySnapshot::default()
        };
        self.seen = ChangeSet::default();
        self.voltage_seen = false;
        self.changed = true;
    }

    /// Whether a voltage sample has arrived since the last reset
    pub fn has_voltage(&self) -> bool {
        self.voltage_seen
    }

    fn speed_kmh(&self, rpm: u16) -> f64 {
        let wheel_rpm = rpm as f64 / self.gear_ratio;
        wheel_rpm * self.wheel_circumference_m * SPEED_FACTOR
    }

    fn set<T: PartialEq + Copy>(
        &mut self,
        field: Field,
        slot: impl FnOnce(&mut TelemetrySnapshot) -> &mut T,
        value: T,
        changes: &mut ChangeSet,
    ) {
        let first = !self.seen.contains(field);
        let current = slot(&mut self.snapshot);
        if first || *current != value {
            *current = value;
            self.seen.insert(field);
            changes.insert(field);
        }
    }

    fn set_f64(
        &mut self,
        field: Field,
        slot: impl FnOnce(&mut TelemetrySnapshot) -> &mut f64,
        value: f64,
        changes: &mut ChangeSet,
    ) {
        let first = !self.seen.contains(field);
        let current = slot(&mut self.snapshot);
        if first || current.to_bits() != value.to_bits() {
            *current = value;
            self.seen.insert(field);
            changes.insert(field);
        }
    }
}

/// Power from the phase current magnitude and battery voltage
///
/// The controller reports drive as negative power; a negative current
/// component (regen) flips the sign.
pub fn power_watts(main: &MainData, voltage: f64) -> f64 {
    let power = -main.current_magnitude * voltage;
    if main.iq < 0.0 || main.id < 0.0 {
        -power
    } else {
        power
    }
}

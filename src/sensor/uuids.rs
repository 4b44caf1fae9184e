//! GATT characteristic identifiers and the arming sequence.
//!
//! Battery and model number live under the Bluetooth SIG base UUID. The
//! SensorTag's own services use the vendor base `F000xxxx-0451-4000-B000-000000000000`.

use uuid::Uuid;

const SIG_BASE: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;
const VENDOR_BASE: u128 = 0x0000_0000_0451_4000_B000_0000_0000_0000;

/// Build a 128-bit identifier from a 16-bit SIG-assigned number.
pub const fn sig_uuid(code: u16) -> Uuid {
    Uuid::from_u128(SIG_BASE | ((code as u128) << 96))
}

/// Build a 128-bit identifier from a 16-bit vendor code.
pub const fn vendor_uuid(code: u16) -> Uuid {
    Uuid::from_u128(VENDOR_BASE | ((0xF000_0000u128 + code as u128) << 96))
}

pub const BATTERY_LEVEL: Uuid = sig_uuid(0x2A19);
pub const MODEL_NUMBER: Uuid = sig_uuid(0x2A24);

pub const TEMPERATURE_DATA: Uuid = vendor_uuid(0xAA01);
pub const TEMPERATURE_ENABLE: Uuid = vendor_uuid(0xAA02);
pub const HUMIDITY_DATA: Uuid = vendor_uuid(0xAA21);
pub const HUMIDITY_ENABLE: Uuid = vendor_uuid(0xAA22);
pub const OPTICAL_DATA: Uuid = vendor_uuid(0xAA71);
pub const OPTICAL_ENABLE: Uuid = vendor_uuid(0xAA72);
pub const MOVEMENT_DATA: Uuid = vendor_uuid(0xAA81);
pub const MOVEMENT_CONFIG: Uuid = vendor_uuid(0xAA82);
pub const MOVEMENT_PERIOD: Uuid = vendor_uuid(0xAA83);

const SENSOR_ON: &[u8] = &[0x01];
/// Axis enable bits 3 to 5 set, wake-on-motion off.
const MOVEMENT_AXES: &[u8] = &[0b0011_1000, 0b0000_0000];
/// Period in units of 10 ms.
const MOVEMENT_PERIOD_100MS: &[u8] = &[0x0A];

/// A characteristic write issued while arming the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmCommand {
    pub characteristic: Uuid,
    pub payload: &'static [u8],
    pub label: &'static str,
}

/// Writes that power on temperature, humidity, optical and movement sensing, in order.
pub const ARM_SEQUENCE: [ArmCommand; 5] = [
    ArmCommand {
        characteristic: TEMPERATURE_ENABLE,
        payload: SENSOR_ON,
        label: "temperature enable",
    },
    ArmCommand {
        characteristic: HUMIDITY_ENABLE,
        payload: SENSOR_ON,
        label: "humidity enable",
    },
    ArmCommand {
        characteristic: OPTICAL_ENABLE,
        payload: SENSOR_ON,
        label: "optical enable",
    },
    ArmCommand {
        characteristic: MOVEMENT_CONFIG,
        payload: MOVEMENT_AXES,
        label: "movement config",
    },
    ArmCommand {
        characteristic: MOVEMENT_PERIOD,
        payload: MOVEMENT_PERIOD_100MS,
        label: "movement period",
    },
];

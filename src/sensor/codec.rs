//! Decoders turning raw characteristic payloads into calibrated values.
//!
//! All decoders are pure. Fixed-width kinds reject payloads of the wrong
//! length instead of reading past the end; movement and battery take the
//! leading bytes they need and ignore the rest.

use crate::sensor::types::{
    HumidityReading, MovementReading, Reading, SensorKind, TemperatureReading,
};

/// Temperature resolution in degrees Celsius per LSB after dropping the status bits.
const TEMPERATURE_SCALE_LSB: f64 = 0.03125;

/// Movement scaling: raw counts map onto a +/-8 range.
const MOVEMENT_RANGE: f64 = 8.0;

/// Errors produced while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{sensor} payload must be {expected} bytes, got {actual}")]
    LengthMismatch {
        sensor: SensorKind,
        expected: usize,
        actual: usize,
    },

    #[error("{sensor} payload needs at least {expected} bytes, got {actual}")]
    TooShort {
        sensor: SensorKind,
        expected: usize,
        actual: usize,
    },
}

/// Decode a payload with the decoder registered for `sensor`.
pub fn decode(sensor: SensorKind, payload: &[u8]) -> Result<Reading, DecodeError> {
    let reading = match sensor {
        SensorKind::Battery => {
            Reading::channels(sensor, vec![f64::from(decode_battery(payload)?)])
        }
        SensorKind::ModelNumber => Reading::text(sensor, decode_model_number(payload)),
        SensorKind::Temperature => {
            Reading::channels(sensor, vec![decode_temperature(payload)?.ambient])
        }
        SensorKind::Movement => Reading::channels(sensor, decode_movement(payload)?.to_channels()),
        SensorKind::Humidity => {
            Reading::channels(sensor, vec![decode_humidity(payload)?.relative_humidity])
        }
        SensorKind::Optical => Reading::channels(sensor, vec![decode_optical(payload)?]),
    };
    Ok(reading)
}

/// Battery level in percent.
pub fn decode_battery(payload: &[u8]) -> Result<u8, DecodeError> {
    payload.first().copied().ok_or(DecodeError::TooShort {
        sensor: SensorKind::Battery,
        expected: 1,
        actual: 0,
    })
}

/// Model number string, one Latin-1 character per byte.
pub fn decode_model_number(payload: &[u8]) -> String {
    payload.iter().map(|&b| char::from(b)).collect()
}

/// Object and ambient temperature from two little-endian `i16` values.
///
/// The registry output keeps only the ambient channel.
pub fn decode_temperature(payload: &[u8]) -> Result<TemperatureReading, DecodeError> {
    let raw = exact::<4>(SensorKind::Temperature, payload)?;
    let raw_object = i16::from_le_bytes([raw[0], raw[1]]);
    let raw_ambient = i16::from_le_bytes([raw[2], raw[3]]);

    Ok(TemperatureReading {
        object: f64::from(raw_object >> 2) * TEMPERATURE_SCALE_LSB,
        ambient: f64::from(raw_ambient >> 2) * TEMPERATURE_SCALE_LSB,
    })
}

/// Accelerometer and gyroscope axes from six little-endian `i16` values.
///
/// The wire order is gyro z/y/x followed by accel z/y/x.
pub fn decode_movement(payload: &[u8]) -> Result<MovementReading, DecodeError> {
    let expected = 12;
    if payload.len() < expected {
        return Err(DecodeError::TooShort {
            sensor: SensorKind::Movement,
            expected,
            actual: payload.len(),
        });
    }

    let axis = |offset: usize| {
        let raw = i16::from_le_bytes([payload[offset], payload[offset + 1]]);
        (f64::from(raw) * MOVEMENT_RANGE) / 32768.0
    };

    Ok(MovementReading {
        gyro: [axis(0), axis(2), axis(4)],
        accel: [axis(6), axis(8), axis(10)],
    })
}

/// Relative humidity and sensor temperature from two little-endian `u16` values.
///
/// The registry output keeps only relative humidity.
pub fn decode_humidity(payload: &[u8]) -> Result<HumidityReading, DecodeError> {
    let raw = exact::<4>(SensorKind::Humidity, payload)?;
    let raw_temperature = u16::from_le_bytes([raw[0], raw[1]]);
    let raw_humidity = u16::from_le_bytes([raw[2], raw[3]]);

    Ok(HumidityReading {
        temperature: -40.0 + 165.0 * (f64::from(raw_temperature) / 65536.0),
        relative_humidity: 100.0 * (f64::from(raw_humidity) / 65536.0),
    })
}

/// Light intensity in lux from a 12-bit mantissa and 4-bit exponent.
pub fn decode_optical(payload: &[u8]) -> Result<f64, DecodeError> {
    let raw = exact::<2>(SensorKind::Optical, payload)?;
    let raw = u16::from_le_bytes(raw);
    let mantissa = u32::from(raw & 0x0FFF);
    let exponent = u32::from((raw & 0xF000) >> 12);

    Ok(0.01 * f64::from(mantissa << exponent))
}

fn exact<const N: usize>(sensor: SensorKind, payload: &[u8]) -> Result<[u8; N], DecodeError> {
    payload.try_into().map_err(|_| DecodeError::LengthMismatch {
        sensor,
        expected: N,
        actual: payload.len(),
    })
}

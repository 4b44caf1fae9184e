//! Sensor registry and reading types.
//!
//! The set of sensors a SensorTag exposes is closed, so the registry is an
//! enum rather than a name-keyed table. Every descriptor property (name,
//! channel count, payload length, characteristic) is a method on the enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::sensor::uuids;

/// Number of channels forwarded per sample when streaming truncates readings.
pub const STREAM_ARITY: usize = 3;

/// One of the sensors modelled on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorKind {
    Battery,
    #[serde(alias = "ModelNr")]
    ModelNumber,
    Temperature,
    #[serde(alias = "MovementSensor")]
    Movement,
    #[serde(alias = "HumiditySensor")]
    Humidity,
    #[serde(alias = "OpticalSensor")]
    Optical,
}

impl SensorKind {
    /// Every sensor in registry order.
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Battery,
        SensorKind::ModelNumber,
        SensorKind::Temperature,
        SensorKind::Movement,
        SensorKind::Humidity,
        SensorKind::Optical,
    ];

    /// Canonical name, also used as the stream name.
    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Battery => "Battery",
            SensorKind::ModelNumber => "ModelNumber",
            SensorKind::Temperature => "Temperature",
            SensorKind::Movement => "Movement",
            SensorKind::Humidity => "Humidity",
            SensorKind::Optical => "Optical",
        }
    }

    /// Number of values a decoded reading carries.
    pub fn channel_count(self) -> usize {
        match self {
            SensorKind::Movement => 6,
            _ => 1,
        }
    }

    /// Channel count of the outbound stream for this sensor.
    pub fn stream_channel_count(self, full_channels: bool) -> usize {
        if full_channels {
            self.channel_count()
        } else {
            self.channel_count().min(STREAM_ARITY)
        }
    }

    /// Fixed payload length, or `None` for variable-length text.
    pub fn payload_len(self) -> Option<usize> {
        match self {
            SensorKind::Battery => Some(1),
            SensorKind::ModelNumber => None,
            SensorKind::Temperature => Some(4),
            SensorKind::Movement => Some(12),
            SensorKind::Humidity => Some(4),
            SensorKind::Optical => Some(2),
        }
    }

    /// Data characteristic read for this sensor.
    pub fn characteristic(self) -> Uuid {
        match self {
            SensorKind::Battery => uuids::BATTERY_LEVEL,
            SensorKind::ModelNumber => uuids::MODEL_NUMBER,
            SensorKind::Temperature => uuids::TEMPERATURE_DATA,
            SensorKind::Movement => uuids::MOVEMENT_DATA,
            SensorKind::Humidity => uuids::HUMIDITY_DATA,
            SensorKind::Optical => uuids::OPTICAL_DATA,
        }
    }

    /// Whether the sensor must be armed before its data characteristic is readable.
    pub fn requires_arming(self) -> bool {
        !matches!(self, SensorKind::Battery | SensorKind::ModelNumber)
    }

    /// Whether readings are numeric and can be pushed onto a sample stream.
    pub fn is_streamable(self) -> bool {
        self != SensorKind::ModelNumber
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a sensor name is not in the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sensor '{0}'")]
pub struct UnknownSensorName(pub String);

impl FromStr for SensorKind {
    type Err = UnknownSensorName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Battery" => Ok(SensorKind::Battery),
            "ModelNumber" | "ModelNr" => Ok(SensorKind::ModelNumber),
            "Temperature" => Ok(SensorKind::Temperature),
            "Movement" | "MovementSensor" => Ok(SensorKind::Movement),
            "Humidity" | "HumiditySensor" => Ok(SensorKind::Humidity),
            "Optical" | "OpticalSensor" => Ok(SensorKind::Optical),
            other => Err(UnknownSensorName(other.to_string())),
        }
    }
}

/// Parse a comma-separated list of sensor names.
pub fn parse_sensor_list(s: &str) -> Result<Vec<SensorKind>, UnknownSensorName> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(SensorKind::from_str)
        .collect()
}

/// Decoded value of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Measurement {
    /// Calibrated numeric channels.
    Channels(Vec<f64>),
    /// Text decoded one character per byte.
    Text(String),
}

/// A decoded reading from one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor: SensorKind,
    pub measurement: Measurement,
}

impl Reading {
    pub fn channels(sensor: SensorKind, values: Vec<f64>) -> Self {
        Self {
            sensor,
            measurement: Measurement::Channels(values),
        }
    }

    pub fn text(sensor: SensorKind, text: String) -> Self {
        Self {
            sensor,
            measurement: Measurement::Text(text),
        }
    }

    /// Number of channels in this reading. Text counts as one channel.
    pub fn channel_count(&self) -> usize {
        match &self.measurement {
            Measurement::Channels(values) => values.len(),
            Measurement::Text(_) => 1,
        }
    }

    /// Numeric values, if the reading has any.
    pub fn values(&self) -> Option<&[f64]> {
        match &self.measurement {
            Measurement::Channels(values) => Some(values),
            Measurement::Text(_) => None,
        }
    }

    /// Values truncated to the stream arity (or all of them with `full_channels`).
    pub fn stream_values(&self, full_channels: bool) -> Option<Vec<f64>> {
        let arity = self.sensor.stream_channel_count(full_channels);
        self.values()
            .map(|values| values.iter().copied().take(arity).collect())
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.measurement {
            Measurement::Text(text) => write!(f, "{}: {text}", self.sensor),
            Measurement::Channels(values) => {
                write!(f, "{}:", self.sensor)?;
                for v in values {
                    write!(f, " {v:.3}")?;
                }
                Ok(())
            }
        }
    }
}

/// Object and ambient temperatures in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub object: f64,
    pub ambient: f64,
}

/// Relative humidity in percent, with the sensor's own temperature in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HumidityReading {
    pub temperature: f64,
    pub relative_humidity: f64,
}

/// Accelerometer (g) and gyroscope axes, each ordered `[z, y, x]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementReading {
    pub accel: [f64; 3],
    pub gyro: [f64; 3],
}

impl MovementReading {
    /// Channel layout of the registry output: accel z/y/x then gyro z/y/x.
    pub fn to_channels(&self) -> Vec<f64> {
        self.accel.iter().chain(self.gyro.iter()).copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_names_round_trip() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.name().parse::<SensorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!("MovementSensor".parse::<SensorKind>().unwrap(), SensorKind::Movement);
        assert_eq!("ModelNr".parse::<SensorKind>().unwrap(), SensorKind::ModelNumber);
        assert!("Pressure".parse::<SensorKind>().is_err());
    }

    #[test]
    fn test_parse_sensor_list() {
        let sensors = parse_sensor_list("Temperature, Movement,").unwrap();
        assert_eq!(sensors, vec![SensorKind::Temperature, SensorKind::Movement]);

        let err = parse_sensor_list("Temperature,Barometer").unwrap_err();
        assert_eq!(err.0, "Barometer");
    }

    #[test]
    fn test_stream_channel_count() {
        assert_eq!(SensorKind::Movement.stream_channel_count(false), 3);
        assert_eq!(SensorKind::Movement.stream_channel_count(true), 6);
        assert_eq!(SensorKind::Temperature.stream_channel_count(false), 1);
    }

    #[test]
    fn test_stream_values_truncate() {
        let reading = Reading::channels(
            SensorKind::Movement,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        );
        assert_eq!(reading.stream_values(false).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(reading.stream_values(true).unwrap().len(), 6);

        let model = Reading::text(SensorKind::ModelNumber, "CC2650".to_string());
        assert!(model.stream_values(false).is_none());
        assert_eq!(model.channel_count(), 1);
    }
}

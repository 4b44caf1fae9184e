//! Sensor registry, characteristic identifiers and payload decoders.

pub mod codec;
pub mod types;
pub mod uuids;

// Re-export commonly used types
pub use codec::{decode, DecodeError};
pub use types::{
    parse_sensor_list, HumidityReading, Measurement, MovementReading, Reading, SensorKind,
    TemperatureReading, UnknownSensorName, STREAM_ARITY,
};
pub use uuids::{ArmCommand, ARM_SEQUENCE};

//! Configuration for the SensorTag bridge.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sensor::SensorKind;
use crate::stream::memory::DEFAULT_INLET_BUFFER;
use crate::window::DEFAULT_WINDOW_CAPACITY;

/// Main configuration for the bridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub publisher: PublisherConfig,
    pub collector: CollectorConfig,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sensortag-bridge")
            .join("config.json")
    }
}

/// Which device to connect to and how long to wait for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// BLE address of the SensorTag
    pub address: String,

    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: "CC:78:AB:7F:75:03".to_string(),
            connect_timeout: Duration::from_secs(4),
        }
    }
}

/// Which sensors to stream and how streams are labelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// One outlet per sensor, named after the sensor
    pub sensors: Vec<SensorKind>,

    /// Source identifier attached to every outlet
    pub source_id: String,

    /// Stream every channel instead of the first three
    pub full_channels: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            sensors: vec![SensorKind::Movement],
            source_id: "SensorTag1".to_string(),
            full_channels: false,
        }
    }
}

/// Which streams to follow and how much history to keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Stream names to resolve, in collection order
    pub streams: Vec<String>,

    #[serde(with = "duration_ms")]
    pub discovery_timeout: Duration,

    /// Upper bound on waiting for one stream's sample; unset blocks indefinitely
    #[serde(with = "option_duration_ms")]
    pub pull_timeout: Option<Duration>,

    /// Entries kept in the rolling window
    pub window_capacity: usize,

    /// Samples buffered per inlet by the in-process bus
    pub inlet_buffer: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            streams: vec![SensorKind::Movement.name().to_string()],
            discovery_timeout: Duration::from_secs(10),
            pull_timeout: None,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            inlet_buffer: DEFAULT_INLET_BUFFER,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

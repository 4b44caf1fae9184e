//! SensorTag Bridge - stream TI CC2650 SensorTag readings as named sample streams.
//!
//! This library connects to a SensorTag over BLE, powers on its sensors,
//! decodes raw characteristic payloads into engineering units and republishes
//! them as timestamped multi-channel streams that any number of consumers can
//! follow.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      SensorTag Bridge                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Device    │──▶│   Codec     │──▶│  Publisher  │        │
//! │  │  Session    │   │ (decoders)  │   │  (outlets)  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │                                             │                │
//! │                                             ▼                │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Window    │◀──│  Collector  │◀──│   Stream    │        │
//! │  │   Buffer    │   │  (inlets)   │   │  Transport  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sensortag_bridge::{DeviceSession, SensorKind, SimulatedSensorTag};
//!
//! let address = "CC:78:AB:7F:75:03";
//! let mut session = DeviceSession::new(SimulatedSensorTag::new(address))?;
//! session.connect(address, Duration::from_secs(4))?;
//! session.arm_sensors()?;
//!
//! let reading = session.acquire(SensorKind::Temperature)?;
//! println!("{reading}");
//! # Ok::<(), sensortag_bridge::Error>(())
//! ```

pub mod collector;
pub mod config;
pub mod device;
pub mod error;
pub mod publisher;
pub mod sensor;
pub mod stats;
pub mod stream;
pub mod window;

// Re-export key types at crate root for convenience
pub use collector::{CollectedSample, Cycle, StreamCollector};
pub use config::{CollectorConfig, Config, ConfigError, DeviceConfig, PublisherConfig};
pub use device::{
    BleTransport, DeviceSession, SessionError, SessionState, SimulatedHandle, SimulatedSensorTag,
    TransportError,
};
pub use error::{Error, Result};
pub use publisher::{ContinuousPublisher, SetupError};
pub use sensor::{decode, DecodeError, Measurement, Reading, SensorKind};
pub use stats::{create_shared_stats, BridgeStats, SharedBridgeStats, StatsSnapshot};
pub use stream::{
    local_clock, Inlet, MemoryBus, MemoryInlet, MemoryOutlet, Outlet, StreamError, StreamInfo,
    StreamSample, StreamTransport,
};
pub use window::{BufferInvariantError, WindowBuffer, WindowSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

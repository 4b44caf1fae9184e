//! Named sample streams.
//!
//! Producers declare an [`Outlet`] per stream and push one multi-channel
//! sample at a time. Consumers resolve an [`Inlet`] by stream name and pull
//! samples in FIFO order. Delivery is only ordered within a stream.

pub mod memory;

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub use memory::{MemoryBus, MemoryInlet, MemoryOutlet};

/// Stream type label used for SensorTag streams.
pub const TAG_STREAM_TYPE: &str = "tag";

/// Seconds on a monotonic clock shared by every stream in the process.
pub fn local_clock() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Description of a stream, fixed when its outlet is declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub name: String,
    pub stream_type: String,
    pub channel_count: usize,
    pub source_id: String,
    pub uid: Uuid,
}

impl StreamInfo {
    pub fn new(
        name: impl Into<String>,
        stream_type: impl Into<String>,
        channel_count: usize,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            stream_type: stream_type.into(),
            channel_count,
            source_id: source_id.into(),
            uid: Uuid::new_v4(),
        }
    }
}

/// One sample as delivered to an inlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSample {
    /// Push time on [`local_clock`].
    pub timestamp: f64,
    pub values: Vec<f64>,
}

/// Errors raised by stream transports.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("no stream named '{name}' found within {timeout:?}")]
    NotFound { name: String, timeout: Duration },

    #[error("timed out waiting for a sample on '{0}'")]
    Timeout(String),

    #[error("stream '{0}' closed")]
    Closed(String),

    #[error("stream '{name}' carries {expected} channels, got {actual}")]
    ChannelCount {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("stream channel count must be positive")]
    NoChannels,
}

/// Producer end of a stream.
pub trait Outlet: Send {
    fn info(&self) -> &StreamInfo;

    /// Push one sample. The value count must equal the declared channel count.
    fn push(&self, values: &[f64]) -> Result<(), StreamError>;

    /// Whether any inlet is currently attached.
    fn has_consumers(&self) -> bool;
}

/// Consumer end of a stream.
pub trait Inlet: Send {
    fn info(&self) -> &StreamInfo;

    /// Block until the next sample arrives.
    fn pull(&self) -> Result<StreamSample, StreamError>;

    /// Block for at most `timeout` waiting for the next sample.
    fn pull_timeout(&self, timeout: Duration) -> Result<StreamSample, StreamError>;
}

/// Capability surface of a pub/sub sample transport.
pub trait StreamTransport {
    type Outlet: Outlet;
    type Inlet: Inlet;

    /// Make a stream discoverable under `info.name`.
    fn declare_outlet(&self, info: StreamInfo) -> Result<Self::Outlet, StreamError>;

    /// Attach to the first stream named `name`, waiting up to `timeout` for one to appear.
    fn resolve_inlet(&self, name: &str, timeout: Duration) -> Result<Self::Inlet, StreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_clock_is_monotonic() {
        let a = local_clock();
        let b = local_clock();
        assert!(b >= a);
    }

    #[test]
    fn test_stream_info_uids_differ() {
        let a = StreamInfo::new("Temperature", TAG_STREAM_TYPE, 1, "SensorTag1");
        let b = StreamInfo::new("Temperature", TAG_STREAM_TYPE, 1, "SensorTag1");
        assert_ne!(a.uid, b.uid);
        assert_eq!(a.name, b.name);
    }
}

//! Crate-level error type.

use crate::device::SessionError;
use crate::sensor::{DecodeError, SensorKind};
use crate::stream::StreamError;
use crate::window::BufferInvariantError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Buffer(#[from] BufferInvariantError),

    #[error("{0} readings are not numeric and cannot be streamed")]
    NotStreamable(SensorKind),

    #[error("session must be ready before publishing, it is {0}")]
    SessionNotReady(crate::device::SessionState),

    #[error("nothing configured: {0}")]
    Empty(&'static str),

    #[error("stream '{0}' listed more than once")]
    DuplicateStream(String),
}

impl Error {
    /// True when the failure came from the device link rather than decoding or streaming.
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Error::Session(_))
    }
}

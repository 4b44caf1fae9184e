//! BLE device access for the SensorTag.
//!
//! The BLE stack itself is a collaborator behind the [`BleTransport`] trait.
//! [`DeviceSession`] owns one transport, drives it through the
//! connect/arm/read lifecycle and exposes each step as a blocking call.

pub mod session;
pub mod simulated;

use async_trait::async_trait;
use uuid::Uuid;

pub use session::{DeviceSession, SessionError, SessionState};
pub use simulated::{SimulatedHandle, SimulatedSensorTag};

/// Errors reported by a BLE transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("device {0} not reachable")]
    Unreachable(String),

    #[error("characteristic {0} not found on device")]
    UnknownCharacteristic(Uuid),

    #[error("device rejected access to {characteristic}: {reason}")]
    Rejected { characteristic: Uuid, reason: String },

    #[error("device disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Other(String),
}

/// Capability surface of a BLE GATT client bound to one device.
///
/// Implementations own the underlying connection. Calls are never issued
/// concurrently on the same transport.
#[async_trait]
pub trait BleTransport: Send {
    /// Open the link to the device at `address`.
    async fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    /// Discover services, returning the characteristics the device exposes.
    async fn discover_services(&mut self) -> Result<Vec<Uuid>, TransportError>;

    /// Write `data` to a characteristic and wait for the acknowledgement.
    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Read the current value of a characteristic.
    async fn read_characteristic(&mut self, characteristic: Uuid)
        -> Result<Vec<u8>, TransportError>;

    /// Release the link. Must be safe to call when not connected.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

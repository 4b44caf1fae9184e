//! Blocking device session over an asynchronous BLE transport.
//!
//! Each public method drives one transport operation to completion on a
//! session-private single-threaded runtime before returning. All mutating
//! methods take `&mut self`, so a session has exactly one owner and no two
//! operations against it can overlap.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{BleTransport, TransportError};
use crate::error::Result;
use crate::sensor::{codec, Reading, SensorKind, UnknownSensorName, ARM_SEQUENCE};

/// Upper bound on releasing the link, so a stalled device cannot hang cleanup.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
    Ready,
    Faulted,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Ready => "ready",
            SessionState::Faulted => "faulted",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Errors raised by a device session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to {address}: {source}")]
    Connection {
        address: String,
        source: TransportError,
    },

    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("a session for {0} is already live")]
    AddressInUse(String),

    #[error("{operation} on {characteristic} failed: {source}")]
    Access {
        operation: &'static str,
        characteristic: Uuid,
        source: TransportError,
    },

    #[error(transparent)]
    UnknownSensor(#[from] UnknownSensorName),

    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("session is faulted, only close is allowed")]
    Faulted,

    #[error("failed to start session runtime: {0}")]
    Runtime(String),
}

impl SessionError {
    /// True for failures establishing the link, as opposed to characteristic access.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SessionError::Connection { .. }
                | SessionError::ConnectTimeout { .. }
                | SessionError::AddressInUse(_)
        )
    }

    /// True for rejected or failed characteristic access, including unknown sensor names.
    pub fn is_access_error(&self) -> bool {
        matches!(
            self,
            SessionError::Access { .. } | SessionError::UnknownSensor(_)
        )
    }
}

/// Addresses with a live session in this process.
fn live_addresses() -> &'static Mutex<HashSet<String>> {
    static LIVE: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

fn claim_address(address: &str) -> bool {
    live_addresses()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(address.to_string())
}

fn release_address(address: &str) {
    live_addresses()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(address);
}

/// One connection to one SensorTag.
pub struct DeviceSession<T: BleTransport> {
    transport: T,
    runtime: Runtime,
    /// Normalised address held while a connection is live or being made
    address: Option<String>,
    state: SessionState,
    armed: HashSet<SensorKind>,
    characteristics: Vec<Uuid>,
}

impl<T: BleTransport> DeviceSession<T> {
    /// Create an unconnected session around `transport`.
    pub fn new(transport: T) -> std::result::Result<Self, SessionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;

        Ok(Self {
            transport,
            runtime,
            address: None,
            state: SessionState::Unconnected,
            armed: HashSet::new(),
            characteristics: Vec::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Address of the connected device, if any.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Whether `sensor` was powered on by [`arm_sensors`](Self::arm_sensors).
    pub fn is_armed(&self, sensor: SensorKind) -> bool {
        self.armed.contains(&sensor)
    }

    /// Characteristics reported by service discovery.
    pub fn characteristics(&self) -> &[Uuid] {
        &self.characteristics
    }

    /// Connect to the device and discover its services.
    ///
    /// On failure the session stays `Unconnected` and may be retried. Cleanup
    /// of a failed attempt is bounded too, so this returns within `timeout`
    /// plus at most `timeout.min(DISCONNECT_TIMEOUT)`.
    pub fn connect(
        &mut self,
        address: &str,
        timeout: Duration,
    ) -> std::result::Result<(), SessionError> {
        self.expect_state("connect", &[SessionState::Unconnected])?;

        let address = address.trim().to_uppercase();
        if !claim_address(&address) {
            return Err(SessionError::AddressInUse(address));
        }

        info!(address = %address, ?timeout, "Connecting to BLE device");
        self.state = SessionState::Connecting;

        let transport = &mut self.transport;
        let result = self.runtime.block_on(async {
            tokio::time::timeout(timeout, async {
                transport.connect(&address).await?;
                transport.discover_services().await
            })
            .await
        });

        match result {
            Ok(Ok(characteristics)) => {
                debug!(
                    address = %address,
                    characteristics = characteristics.len(),
                    "Service discovery complete"
                );
                self.characteristics = characteristics;
                self.address = Some(address);
                self.state = SessionState::Connected;
                info!("Connected");
                Ok(())
            }
            Ok(Err(source)) => {
                warn!(address = %address, error = %source, "Connection failed");
                self.abandon_connect(&address, timeout);
                Err(SessionError::Connection { address, source })
            }
            Err(_) => {
                warn!(address = %address, ?timeout, "Connection timed out");
                self.abandon_connect(&address, timeout);
                Err(SessionError::ConnectTimeout { address, timeout })
            }
        }
    }

    fn abandon_connect(&mut self, address: &str, timeout: Duration) {
        // A partially opened link must not leak into the next attempt
        match self.disconnect_within(timeout.min(DISCONNECT_TIMEOUT)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Disconnect after failed connect"),
            Err(_) => warn!(address = %address, "Disconnect after failed connect timed out"),
        }
        release_address(address);
        self.state = SessionState::Unconnected;
    }

    fn disconnect_within(
        &mut self,
        limit: Duration,
    ) -> std::result::Result<std::result::Result<(), TransportError>, tokio::time::error::Elapsed>
    {
        let transport = &mut self.transport;
        self.runtime
            .block_on(async { tokio::time::timeout(limit, transport.disconnect()).await })
    }

    /// Power on and configure the device's sensors.
    ///
    /// Call exactly once per session, after [`connect`](Self::connect).
    /// Any failed write faults the session.
    pub fn arm_sensors(&mut self) -> std::result::Result<(), SessionError> {
        self.expect_state("arm sensors", &[SessionState::Connected])?;

        info!("Initiating sensors");
        for command in ARM_SEQUENCE.iter() {
            let transport = &mut self.transport;
            let result = self.runtime.block_on(
                transport.write_characteristic(command.characteristic, command.payload),
            );

            if let Err(source) = result {
                warn!(step = command.label, error = %source, "Arming failed");
                self.state = SessionState::Faulted;
                return Err(SessionError::Access {
                    operation: "write",
                    characteristic: command.characteristic,
                    source,
                });
            }
            debug!(step = command.label, "Characteristic written");
        }

        self.armed = SensorKind::ALL
            .into_iter()
            .filter(|s| s.requires_arming())
            .collect();
        self.state = SessionState::Ready;
        info!("Sensors initiated");
        Ok(())
    }

    /// Read the raw payload of a sensor's data characteristic.
    ///
    /// A rejected read leaves the session usable; losing the link faults it.
    pub fn read(&mut self, sensor: SensorKind) -> std::result::Result<Vec<u8>, SessionError> {
        self.expect_state("read", &[SessionState::Connected, SessionState::Ready])?;

        let characteristic = sensor.characteristic();
        let transport = &mut self.transport;
        let result = self
            .runtime
            .block_on(transport.read_characteristic(characteristic));

        result.map_err(|source| {
            if source == TransportError::Disconnected {
                warn!(sensor = %sensor, "Device disconnected during read");
                self.state = SessionState::Faulted;
            }
            SessionError::Access {
                operation: "read",
                characteristic,
                source,
            }
        })
    }

    /// Read a sensor by registry name.
    pub fn read_by_name(&mut self, name: &str) -> std::result::Result<Vec<u8>, SessionError> {
        let sensor: SensorKind = name.parse()?;
        self.read(sensor)
    }

    /// Read and decode the current value of a sensor.
    pub fn acquire(&mut self, sensor: SensorKind) -> Result<Reading> {
        let payload = self.read(sensor)?;
        Ok(codec::decode(sensor, &payload)?)
    }

    /// Release the connection. Safe from any state and idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(address) = self.address.take() {
            match self.disconnect_within(DISCONNECT_TIMEOUT) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(address = %address, error = %e, "Disconnect failed"),
                Err(_) => warn!(address = %address, "Disconnect timed out"),
            }
            release_address(&address);
            info!(address = %address, "Session closed");
        }

        self.armed.clear();
        self.state = SessionState::Closed;
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[SessionState],
    ) -> std::result::Result<(), SessionError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else if self.state == SessionState::Faulted {
            Err(SessionError::Faulted)
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl<T: BleTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}

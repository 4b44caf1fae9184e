//! In-memory SensorTag implementing [`BleTransport`].
//!
//! Reproduces the device rules the session depends on: data characteristics
//! of armable sensors reject reads until their enable/config characteristic
//! has been written, unknown characteristics are rejected, and a dropped
//! link reports `Disconnected`. A [`SimulatedHandle`] lets callers change
//! payloads and inject faults while a session owns the transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::device::{BleTransport, TransportError};
use crate::sensor::{uuids, SensorKind};

/// Movement axis amplitude in raw counts when animated (1 g).
const ANIMATION_AMPLITUDE: f64 = 4096.0;

struct SimState {
    connected: bool,
    written: HashMap<Uuid, Vec<u8>>,
    payloads: HashMap<SensorKind, Vec<u8>>,
    reject_writes: bool,
    disconnect_after: Option<u64>,
    reads: u64,
    animated: bool,
}

impl SimState {
    fn new() -> Self {
        let payloads = SensorKind::ALL
            .into_iter()
            .map(|sensor| (sensor, default_payload(sensor)))
            .collect();

        Self {
            connected: false,
            written: HashMap::new(),
            payloads,
            reject_writes: false,
            disconnect_after: None,
            reads: 0,
            animated: false,
        }
    }

    fn is_armed(&self, sensor: SensorKind) -> bool {
        let enabled = |uuid: &Uuid| self.written.get(uuid).is_some_and(|v| v == &[0x01]);
        match sensor {
            SensorKind::Battery | SensorKind::ModelNumber => true,
            SensorKind::Temperature => enabled(&uuids::TEMPERATURE_ENABLE),
            SensorKind::Humidity => enabled(&uuids::HUMIDITY_ENABLE),
            SensorKind::Optical => enabled(&uuids::OPTICAL_ENABLE),
            SensorKind::Movement => self
                .written
                .get(&uuids::MOVEMENT_CONFIG)
                .is_some_and(|v| v.iter().any(|&b| b != 0)),
        }
    }

    fn payload(&self, sensor: SensorKind) -> Vec<u8> {
        if self.animated && sensor == SensorKind::Movement {
            return animated_movement(self.reads);
        }
        self.payloads.get(&sensor).cloned().unwrap_or_default()
    }
}

fn default_payload(sensor: SensorKind) -> Vec<u8> {
    match sensor {
        SensorKind::Battery => vec![87],
        SensorKind::ModelNumber => b"CC2650 SensorTag".to_vec(),
        // object 20.0 C, ambient 22.0 C
        SensorKind::Temperature => vec![0x00, 0x0A, 0x00, 0x0B],
        // gyro at rest, 1 g on the z axis
        SensorKind::Movement => vec![0, 0, 0, 0, 0, 0, 0x00, 0x10, 0, 0, 0, 0],
        // 21.875 C, 50 %RH
        SensorKind::Humidity => vec![0x00, 0x60, 0x00, 0x80],
        // 2.57 lux
        SensorKind::Optical => vec![0x01, 0x01],
    }
}

fn animated_movement(step: u64) -> Vec<u8> {
    let phase = step as f64 * 0.2;
    let axes = [
        0.0,
        0.0,
        0.0,
        phase.cos() * ANIMATION_AMPLITUDE,
        phase.sin() * ANIMATION_AMPLITUDE,
        (phase * 0.5).sin() * ANIMATION_AMPLITUDE,
    ];
    axes.iter()
        .flat_map(|&v| (v as i16).to_le_bytes())
        .collect()
}

fn sensor_for(characteristic: Uuid) -> Option<SensorKind> {
    SensorKind::ALL
        .into_iter()
        .find(|s| s.characteristic() == characteristic)
}

fn is_config_characteristic(characteristic: Uuid) -> bool {
    uuids::ARM_SEQUENCE
        .iter()
        .any(|c| c.characteristic == characteristic)
}

/// A simulated SensorTag reachable at one address.
pub struct SimulatedSensorTag {
    address: String,
    state: Arc<Mutex<SimState>>,
    hang_connect: bool,
    read_latency: Option<Duration>,
}

impl SimulatedSensorTag {
    /// Create a device answering at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(SimState::new())),
            hang_connect: false,
            read_latency: None,
        }
    }

    /// Never complete a connection attempt.
    pub fn with_hanging_connect(mut self) -> Self {
        self.hang_connect = true;
        self
    }

    /// Delay every characteristic read.
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = Some(latency);
        self
    }

    /// Vary movement readings over time instead of returning a fixed payload.
    pub fn animated(self) -> Self {
        self.lock().animated = true;
        self
    }

    /// Get a handle for inspecting and perturbing the device.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BleTransport for SimulatedSensorTag {
    async fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        if !self.address.eq_ignore_ascii_case(address) {
            return Err(TransportError::Unreachable(address.to_string()));
        }
        if self.hang_connect {
            std::future::pending::<()>().await;
        }
        self.lock().connected = true;
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<Vec<Uuid>, TransportError> {
        if !self.lock().connected {
            return Err(TransportError::Disconnected);
        }
        let mut characteristics: Vec<Uuid> =
            SensorKind::ALL.iter().map(|s| s.characteristic()).collect();
        characteristics.extend(uuids::ARM_SEQUENCE.iter().map(|c| c.characteristic));
        Ok(characteristics)
    }

    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if !is_config_characteristic(characteristic) {
            return Err(TransportError::UnknownCharacteristic(characteristic));
        }
        if state.reject_writes {
            return Err(TransportError::Rejected {
                characteristic,
                reason: "write not permitted".to_string(),
            });
        }
        state.written.insert(characteristic, data.to_vec());
        Ok(())
    }

    async fn read_characteristic(
        &mut self,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, TransportError> {
        if let Some(latency) = self.read_latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.disconnect_after.is_some_and(|n| state.reads >= n) {
            state.connected = false;
        }
        if !state.connected {
            return Err(TransportError::Disconnected);
        }

        let sensor =
            sensor_for(characteristic).ok_or(TransportError::UnknownCharacteristic(characteristic))?;
        if !state.is_armed(sensor) {
            return Err(TransportError::Rejected {
                characteristic,
                reason: format!("{sensor} sensor is not enabled"),
            });
        }

        let payload = state.payload(sensor);
        state.reads += 1;
        Ok(payload)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connected = false;
        state.written.clear();
        Ok(())
    }
}

/// Shared control over a [`SimulatedSensorTag`].
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the payload returned for a sensor.
    pub fn set_payload(&self, sensor: SensorKind, payload: Vec<u8>) {
        self.lock().payloads.insert(sensor, payload);
    }

    /// Make every characteristic write fail.
    pub fn reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    /// Drop the link as if the device went out of range.
    pub fn drop_link(&self) {
        self.lock().connected = false;
    }

    /// Drop the link once `reads` successful reads have been served.
    pub fn disconnect_after(&self, reads: u64) {
        self.lock().disconnect_after = Some(reads);
    }

    /// Number of successful reads served.
    pub fn read_count(&self) -> u64 {
        self.lock().reads
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Last value written to a characteristic in the current connection.
    pub fn written(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        self.lock().written.get(&characteristic).cloned()
    }
}

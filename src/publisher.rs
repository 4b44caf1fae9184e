//! Continuous acquisition loop: read, decode, push.
//!
//! One outlet is declared per configured sensor. Each cycle reads every
//! sensor once in configuration order and pushes one sample per sensor.
//! There is no pacing; the device's read latency sets the rate. The first
//! device, decode or stream failure ends the loop and is returned to the
//! caller; reconnecting is left to whoever owns the publisher.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info};

use crate::config::PublisherConfig;
use crate::device::{BleTransport, DeviceSession, SessionState};
use crate::error::{Error, Result};
use crate::sensor::{codec, SensorKind};
use crate::stats::SharedBridgeStats;
use crate::stream::{Outlet, StreamInfo, StreamTransport, TAG_STREAM_TYPE};

/// A publisher that could not be set up, with the session it was given.
///
/// The session is untouched by a rejected configuration, so the caller can
/// fix the sensor list and try again without reconnecting.
#[derive(thiserror::Error)]
#[error("{error}")]
pub struct SetupError<T: BleTransport> {
    pub error: Error,
    session: DeviceSession<T>,
}

impl<T: BleTransport> SetupError<T> {
    /// Take back the session.
    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }

    pub fn into_error(self) -> Error {
        self.error
    }
}

impl<T: BleTransport> fmt::Debug for SetupError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupError")
            .field("error", &self.error)
            .field("session", &self.session.state())
            .finish_non_exhaustive()
    }
}

impl<T: BleTransport> From<SetupError<T>> for Error {
    fn from(err: SetupError<T>) -> Self {
        err.error
    }
}

/// Reject empty lists, text sensors and repeats before anything is declared.
fn validate_sensors(sensors: &[SensorKind]) -> Result<()> {
    if sensors.is_empty() {
        return Err(Error::Empty("no sensors to publish"));
    }

    let mut seen = HashSet::new();
    for &sensor in sensors {
        if !sensor.is_streamable() {
            return Err(Error::NotStreamable(sensor));
        }
        if !seen.insert(sensor) {
            return Err(Error::DuplicateStream(sensor.name().to_string()));
        }
    }
    Ok(())
}

struct PublishedStream<O> {
    sensor: SensorKind,
    outlet: O,
}

/// Drives a ready [`DeviceSession`] and forwards readings to outlets.
pub struct ContinuousPublisher<T: BleTransport, O: Outlet> {
    session: DeviceSession<T>,
    streams: Vec<PublishedStream<O>>,
    full_channels: bool,
    stats: SharedBridgeStats,
}

impl<T: BleTransport, O: Outlet> ContinuousPublisher<T, O> {
    /// Declare one outlet per configured sensor on `transport`.
    ///
    /// The session must already be connected and armed. On failure the
    /// session comes back inside the [`SetupError`] and any outlets declared
    /// so far are closed.
    pub fn new<S>(
        session: DeviceSession<T>,
        transport: &S,
        config: &PublisherConfig,
        stats: SharedBridgeStats,
    ) -> std::result::Result<Self, SetupError<T>>
    where
        S: StreamTransport<Outlet = O>,
    {
        if let Err(error) = validate_sensors(&config.sensors) {
            return Err(SetupError { error, session });
        }
        if session.state() != SessionState::Ready {
            let error = Error::SessionNotReady(session.state());
            return Err(SetupError { error, session });
        }

        let mut streams = Vec::with_capacity(config.sensors.len());
        for &sensor in &config.sensors {
            let info = StreamInfo::new(
                sensor.name(),
                TAG_STREAM_TYPE,
                sensor.stream_channel_count(config.full_channels),
                config.source_id.clone(),
            );
            let outlet = match transport.declare_outlet(info) {
                Ok(outlet) => outlet,
                Err(e) => {
                    return Err(SetupError {
                        error: e.into(),
                        session,
                    })
                }
            };
            info!(sensor = %sensor, "Added outlet");
            streams.push(PublishedStream { sensor, outlet });
        }

        Ok(Self {
            session,
            streams,
            full_channels: config.full_channels,
            stats,
        })
    }

    /// Descriptions of the declared outlets.
    pub fn streams(&self) -> impl Iterator<Item = &StreamInfo> + '_ {
        self.streams.iter().map(|s| s.outlet.info())
    }

    pub fn session(&self) -> &DeviceSession<T> {
        &self.session
    }

    /// Read every configured sensor once and push the results.
    pub fn step(&mut self) -> Result<()> {
        for stream in &self.streams {
            let payload = self.session.read(stream.sensor)?;
            self.stats.record_device_read();

            let reading = codec::decode(stream.sensor, &payload)?;
            let values = reading
                .stream_values(self.full_channels)
                .ok_or(Error::NotStreamable(stream.sensor))?;

            stream.outlet.push(&values)?;
            self.stats.record_sample_published();
            debug!(sensor = %stream.sensor, ?values, "Pushed sample");
        }
        Ok(())
    }

    /// Run cycles until `running` is cleared or a cycle fails.
    ///
    /// Returns the number of completed cycles.
    pub fn run(&mut self, running: &AtomicBool) -> Result<u64> {
        info!(streams = self.streams.len(), "Starting continuous outlets");

        let mut cycles = 0u64;
        while running.load(Ordering::SeqCst) {
            if let Err(e) = self.step() {
                error!(error = %e, cycles, "Publisher stopped on fault");
                return Err(e);
            }
            cycles += 1;
        }

        info!(cycles, "Publisher stopped");
        Ok(cycles)
    }

    /// Drop the outlets and hand the session back.
    pub fn into_session(self) -> DeviceSession<T> {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimulatedSensorTag;
    use crate::stats::create_shared_stats;
    use crate::stream::{Inlet, MemoryBus, MemoryOutlet};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn ready_session(address: &str) -> DeviceSession<SimulatedSensorTag> {
        let mut session = DeviceSession::new(SimulatedSensorTag::new(address)).unwrap();
        session.connect(address, TIMEOUT).unwrap();
        session.arm_sensors().unwrap();
        session
    }

    fn config(sensors: &[SensorKind]) -> PublisherConfig {
        PublisherConfig {
            sensors: sensors.to_vec(),
            ..PublisherConfig::default()
        }
    }

    #[test]
    fn test_one_sample_per_sensor_per_step() {
        let bus = MemoryBus::new();
        let stats = create_shared_stats();
        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            ready_session("BB:00:00:00:00:01"),
            &bus,
            &config(&[SensorKind::Temperature, SensorKind::Optical]),
            stats.clone(),
        )
        .unwrap();

        let temperature = bus.resolve_inlet("Temperature", TIMEOUT).unwrap();
        let optical = bus.resolve_inlet("Optical", TIMEOUT).unwrap();

        publisher.step().unwrap();
        publisher.step().unwrap();

        assert_eq!(temperature.pull().unwrap().values, vec![22.0]);
        assert_eq!(temperature.pull().unwrap().values, vec![22.0]);
        assert!((optical.pull().unwrap().values[0] - 2.57).abs() < 1e-9);
        assert_eq!(stats.stats().device_reads, 4);
        assert_eq!(stats.stats().samples_published, 4);
    }

    #[test]
    fn test_movement_truncated_to_three_channels() {
        let bus = MemoryBus::new();
        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            ready_session("BB:00:00:00:00:02"),
            &bus,
            &config(&[SensorKind::Movement]),
            create_shared_stats(),
        )
        .unwrap();

        let inlet = bus.resolve_inlet("Movement", TIMEOUT).unwrap();
        assert_eq!(inlet.info().channel_count, 3);
        assert_eq!(inlet.info().source_id, "SensorTag1");

        publisher.step().unwrap();
        assert_eq!(inlet.pull().unwrap().values, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_full_channel_streaming() {
        let bus = MemoryBus::new();
        let mut cfg = config(&[SensorKind::Movement]);
        cfg.full_channels = true;
        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            ready_session("BB:00:00:00:00:03"),
            &bus,
            &cfg,
            create_shared_stats(),
        )
        .unwrap();

        let inlet = bus.resolve_inlet("Movement", TIMEOUT).unwrap();
        publisher.step().unwrap();
        assert_eq!(inlet.pull().unwrap().values.len(), 6);
    }

    #[test]
    fn test_rejects_unready_session_and_text_sensor() {
        let bus = MemoryBus::new();
        let address = "BB:00:00:00:00:04";
        let mut session = DeviceSession::new(SimulatedSensorTag::new(address)).unwrap();
        session.connect(address, TIMEOUT).unwrap();

        let err = ContinuousPublisher::<_, MemoryOutlet>::new(
            session,
            &bus,
            &config(&[SensorKind::Temperature]),
            create_shared_stats(),
        )
        .err()
        .unwrap();
        assert!(matches!(err.error, Error::SessionNotReady(SessionState::Connected)));
        assert_eq!(err.into_session().state(), SessionState::Connected);

        let err = ContinuousPublisher::<_, MemoryOutlet>::new(
            ready_session("BB:00:00:00:00:05"),
            &bus,
            &config(&[SensorKind::ModelNumber]),
            create_shared_stats(),
        )
        .err()
        .unwrap()
        .into_error();
        assert!(matches!(err, Error::NotStreamable(SensorKind::ModelNumber)));

        let err = ContinuousPublisher::<_, MemoryOutlet>::new(
            ready_session("BB:00:00:00:00:06"),
            &bus,
            &config(&[SensorKind::Optical, SensorKind::Optical]),
            create_shared_stats(),
        )
        .err()
        .unwrap()
        .into_error();
        assert!(matches!(err, Error::DuplicateStream(_)));
    }

    #[test]
    fn test_rejected_sensor_list_keeps_session() {
        let bus = MemoryBus::new();
        let address = "BB:00:00:00:00:0A";
        let tag = SimulatedSensorTag::new(address);
        let device = tag.handle();
        let mut session = DeviceSession::new(tag).unwrap();
        session.connect(address, TIMEOUT).unwrap();
        session.arm_sensors().unwrap();

        let err = ContinuousPublisher::<_, MemoryOutlet>::new(
            session,
            &bus,
            &config(&[SensorKind::Temperature, SensorKind::ModelNumber]),
            create_shared_stats(),
        )
        .err()
        .unwrap();
        assert!(matches!(err.error, Error::NotStreamable(SensorKind::ModelNumber)));
        assert!(device.is_connected());
        // Nothing was declared for the sensors ahead of the rejected one
        assert!(bus
            .resolve_inlet("Temperature", Duration::from_millis(20))
            .is_err());

        let session = err.into_session();
        assert_eq!(session.state(), SessionState::Ready);
        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            session,
            &bus,
            &config(&[SensorKind::Temperature]),
            create_shared_stats(),
        )
        .unwrap();
        let inlet = bus.resolve_inlet("Temperature", TIMEOUT).unwrap();
        publisher.step().unwrap();
        assert_eq!(inlet.pull().unwrap().values, vec![22.0]);
    }

    #[test]
    fn test_run_exits_on_device_fault() {
        let bus = MemoryBus::new();
        let address = "BB:00:00:00:00:07";
        let tag = SimulatedSensorTag::new(address);
        let handle = tag.handle();
        let mut session = DeviceSession::new(tag).unwrap();
        session.connect(address, TIMEOUT).unwrap();
        session.arm_sensors().unwrap();
        handle.disconnect_after(10);

        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            session,
            &bus,
            &config(&[SensorKind::Temperature, SensorKind::Humidity]),
            create_shared_stats(),
        )
        .unwrap();

        let running = AtomicBool::new(true);
        let err = publisher.run(&running).unwrap_err();
        assert!(err.is_device_fault());
        assert_eq!(publisher.session().state(), SessionState::Faulted);
        assert_eq!(handle.read_count(), 10);
    }

    #[test]
    fn test_run_exits_on_decode_error() {
        let bus = MemoryBus::new();
        let address = "BB:00:00:00:00:08";
        let tag = SimulatedSensorTag::new(address);
        tag.handle().set_payload(SensorKind::Optical, vec![0x01]);
        let mut session = DeviceSession::new(tag).unwrap();
        session.connect(address, TIMEOUT).unwrap();
        session.arm_sensors().unwrap();

        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            session,
            &bus,
            &config(&[SensorKind::Optical]),
            create_shared_stats(),
        )
        .unwrap();

        let running = AtomicBool::new(true);
        assert!(matches!(publisher.run(&running), Err(Error::Decode(_))));
    }

    #[test]
    fn test_cleared_flag_runs_no_cycles() {
        let bus = MemoryBus::new();
        let mut publisher: ContinuousPublisher<_, MemoryOutlet> = ContinuousPublisher::new(
            ready_session("BB:00:00:00:00:09"),
            &bus,
            &config(&[SensorKind::Battery]),
            create_shared_stats(),
        )
        .unwrap();

        let running = AtomicBool::new(false);
        assert_eq!(publisher.run(&running).unwrap(), 0);

        let session = publisher.into_session();
        assert_eq!(session.state(), SessionState::Ready);
    }
}

//! Fan-in of named streams into a rolling window.
//!
//! Each cycle pulls exactly one sample from every resolved inlet, in
//! configuration order, so the cycle rate follows the slowest stream. A
//! cycle is only recorded once every stream has produced; if any pull fails
//! nothing is appended for that cycle.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::stats::SharedBridgeStats;
use crate::stream::{local_clock, Inlet, StreamTransport};
use crate::window::{WindowBuffer, WindowSnapshot};

/// A sample as received by the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedSample {
    pub stream: String,
    /// Arrival time on [`local_clock`]
    pub arrival: f64,
    /// Push time reported by the outlet
    pub source_timestamp: f64,
    pub values: Vec<f64>,
}

/// One complete cycle keyed by stream name.
pub type Cycle = BTreeMap<String, CollectedSample>;

/// Pulls one sample per stream per cycle and keeps a rolling window of cycles.
pub struct StreamCollector<I: Inlet> {
    inlets: Vec<I>,
    window: WindowBuffer<Vec<CollectedSample>>,
    pull_timeout: Option<std::time::Duration>,
    stats: SharedBridgeStats,
}

impl<I: Inlet> StreamCollector<I> {
    /// Resolve one inlet per configured stream name.
    ///
    /// Fails if any name has no outlet within the discovery timeout.
    pub fn resolve<S>(
        transport: &S,
        config: &CollectorConfig,
        stats: SharedBridgeStats,
    ) -> Result<Self>
    where
        S: StreamTransport<Inlet = I>,
    {
        if config.streams.is_empty() {
            return Err(Error::Empty("no streams to collect"));
        }

        let mut seen = HashSet::new();
        let mut inlets = Vec::with_capacity(config.streams.len());
        for name in &config.streams {
            if !seen.insert(name.as_str()) {
                return Err(Error::DuplicateStream(name.clone()));
            }

            let inlet = transport.resolve_inlet(name, config.discovery_timeout)?;
            info!(
                stream = %name,
                channels = inlet.info().channel_count,
                source_id = %inlet.info().source_id,
                "Resolved inlet"
            );
            inlets.push(inlet);
        }

        Ok(Self {
            inlets,
            window: WindowBuffer::new(config.window_capacity),
            pull_timeout: config.pull_timeout,
            stats,
        })
    }

    /// Names of the followed streams in collection order.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inlets.iter().map(|i| i.info().name.as_str())
    }

    /// Pull one sample from every stream and record the cycle.
    pub fn collect(&mut self) -> Result<Cycle> {
        let mut samples = Vec::with_capacity(self.inlets.len());

        for inlet in &self.inlets {
            let pulled = match self.pull_timeout {
                Some(timeout) => inlet.pull_timeout(timeout),
                None => inlet.pull(),
            };

            let sample = match pulled {
                Ok(sample) => sample,
                Err(e) => {
                    warn!(stream = %inlet.info().name, error = %e, "Cycle abandoned");
                    self.stats.record_cycle_failed();
                    return Err(e.into());
                }
            };

            samples.push(CollectedSample {
                stream: inlet.info().name.clone(),
                arrival: local_clock(),
                source_timestamp: sample.timestamp,
                values: sample.values,
            });
        }

        let completed = samples.last().map_or_else(local_clock, |s| s.arrival);
        let cycle: Cycle = samples
            .iter()
            .map(|s| (s.stream.clone(), s.clone()))
            .collect();

        self.window.append(completed, samples);
        self.window.check()?;
        self.stats.record_cycle_collected();
        Ok(cycle)
    }

    /// Collect cycles until `running` is cleared or a cycle fails.
    ///
    /// Returns the number of completed cycles.
    pub fn run<F>(&mut self, running: &AtomicBool, mut on_cycle: F) -> Result<u64>
    where
        F: FnMut(&Cycle, &WindowBuffer<Vec<CollectedSample>>),
    {
        info!(streams = self.inlets.len(), "Starting collection");

        let mut cycles = 0u64;
        while running.load(Ordering::SeqCst) {
            let cycle = self.collect()?;
            cycles += 1;
            on_cycle(&cycle, &self.window);
        }

        info!(cycles, "Collection stopped");
        Ok(cycles)
    }

    /// The rolling window of completed cycles.
    pub fn window(&self) -> &WindowBuffer<Vec<CollectedSample>> {
        &self.window
    }

    /// Copy of the rolling window for rendering.
    pub fn snapshot(&self) -> WindowSnapshot<Vec<CollectedSample>> {
        self.window.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;
    use crate::stream::{MemoryBus, MemoryInlet, Outlet, StreamError, StreamInfo, TAG_STREAM_TYPE};
    use std::time::Duration;

    fn config(streams: &[&str]) -> CollectorConfig {
        CollectorConfig {
            streams: streams.iter().map(|s| s.to_string()).collect(),
            discovery_timeout: Duration::from_millis(100),
            pull_timeout: Some(Duration::from_millis(50)),
            window_capacity: 3,
            ..CollectorConfig::default()
        }
    }

    fn info(name: &str, channels: usize) -> StreamInfo {
        StreamInfo::new(name, TAG_STREAM_TYPE, channels, "test")
    }

    #[test]
    fn test_partial_cycle_not_recorded() {
        let bus = MemoryBus::new();
        let temperature = bus.declare_outlet(info("Temperature", 1)).unwrap();
        let movement = bus.declare_outlet(info("Movement", 3)).unwrap();
        let stats = create_shared_stats();

        let mut collector: StreamCollector<MemoryInlet> =
            StreamCollector::resolve(&bus, &config(&["Temperature", "Movement"]), stats.clone())
                .unwrap();

        temperature.push(&[22.0]).unwrap();
        let err = collector.collect().unwrap_err();
        assert!(matches!(err, Error::Stream(StreamError::Timeout(_))));
        assert!(collector.window().is_empty());
        assert_eq!(stats.stats().cycles_failed, 1);

        temperature.push(&[22.5]).unwrap();
        movement.push(&[1.0, 0.0, 0.0]).unwrap();
        let cycle = collector.collect().unwrap();
        assert_eq!(cycle.len(), 2);
        assert_eq!(cycle["Temperature"].values, vec![22.5]);
        assert_eq!(cycle["Movement"].values, vec![1.0, 0.0, 0.0]);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.samples[0].len(), 2);
        assert_eq!(snapshot.samples[0][0].stream, "Temperature");
        assert_eq!(stats.stats().cycles_collected, 1);
    }

    #[test]
    fn test_missing_stream_is_discovery_error() {
        let bus = MemoryBus::new();
        let _outlet = bus.declare_outlet(info("Temperature", 1)).unwrap();

        let err = StreamCollector::<MemoryInlet>::resolve(
            &bus,
            &config(&["Temperature", "Optical"]),
            create_shared_stats(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            Error::Stream(StreamError::NotFound { ref name, .. }) if name == "Optical"
        ));
    }

    #[test]
    fn test_rejects_empty_and_duplicate_streams() {
        let bus = MemoryBus::new();
        assert!(matches!(
            StreamCollector::<MemoryInlet>::resolve(&bus, &config(&[]), create_shared_stats()),
            Err(Error::Empty(_))
        ));
        assert!(matches!(
            StreamCollector::<MemoryInlet>::resolve(
                &bus,
                &config(&["Optical", "Optical"]),
                create_shared_stats()
            ),
            Err(Error::DuplicateStream(_))
        ));
    }

    #[test]
    fn test_window_keeps_latest_cycles() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Optical", 1)).unwrap();
        let mut collector: StreamCollector<MemoryInlet> =
            StreamCollector::resolve(&bus, &config(&["Optical"]), create_shared_stats()).unwrap();

        for i in 0..5 {
            outlet.push(&[i as f64]).unwrap();
            collector.collect().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 3);
        let values: Vec<f64> = snapshot.samples.iter().map(|c| c[0].values[0]).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert!(snapshot.timestamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_run_stops_when_stream_closes() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Battery", 1)).unwrap();
        let mut cfg = config(&["Battery"]);
        cfg.pull_timeout = None;
        let mut collector: StreamCollector<MemoryInlet> =
            StreamCollector::resolve(&bus, &cfg, create_shared_stats()).unwrap();

        outlet.push(&[87.0]).unwrap();
        outlet.push(&[86.0]).unwrap();
        drop(outlet);

        let running = AtomicBool::new(true);
        let mut seen = Vec::new();
        let err = collector
            .run(&running, |cycle, _| seen.push(cycle["Battery"].values[0]))
            .unwrap_err();
        assert!(matches!(err, Error::Stream(StreamError::Closed(_))));
        assert_eq!(seen, vec![87.0, 86.0]);
        assert_eq!(collector.window().len(), 2);
    }
}

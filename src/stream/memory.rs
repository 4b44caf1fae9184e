//! In-process stream transport.
//!
//! Every inlet gets its own bounded channel, so any number of consumers can
//! follow one outlet. A consumer that falls behind loses its oldest buffered
//! samples rather than stalling the producer, so it always catches up to
//! fresh data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info};

use crate::stream::{
    local_clock, Inlet, Outlet, StreamError, StreamInfo, StreamSample, StreamTransport,
};

/// Samples buffered per inlet. A push beyond this evicts that inlet's oldest sample.
pub const DEFAULT_INLET_BUFFER: usize = 1024;

struct Subscriber {
    sender: Sender<StreamSample>,
    /// Second handle on the inlet's queue, used to evict from the front
    evict: Receiver<StreamSample>,
    alive: Weak<()>,
}

impl Subscriber {
    fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }

    /// Queue `sample`, evicting the oldest one if the queue is full.
    /// Returns true if a sample was evicted.
    fn deliver(&self, sample: StreamSample) -> bool {
        match self.sender.try_send(sample) {
            Ok(()) => false,
            Err(TrySendError::Full(sample)) => {
                let evicted = self.evict.try_recv().is_ok();
                // Only this outlet pushes, so the freed slot is still free
                let _ = self.sender.try_send(sample);
                evicted
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

struct OutletShared {
    info: StreamInfo,
    subscribers: Mutex<Vec<Subscriber>>,
}

struct BusInner {
    streams: Mutex<Vec<Arc<OutletShared>>>,
    declared: Condvar,
    dropped: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A stream registry shared by producers and consumers in one process.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
    inlet_buffer: usize,
}

impl MemoryBus {
    /// Create an empty bus with the default inlet buffer.
    pub fn new() -> Self {
        Self::with_inlet_buffer(DEFAULT_INLET_BUFFER)
    }

    /// Create an empty bus buffering up to `inlet_buffer` samples per inlet.
    pub fn with_inlet_buffer(inlet_buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                streams: Mutex::new(Vec::new()),
                declared: Condvar::new(),
                dropped: AtomicU64::new(0),
            }),
            inlet_buffer: inlet_buffer.max(1),
        }
    }

    /// Names of the currently declared streams, in declaration order.
    pub fn stream_names(&self) -> Vec<String> {
        lock(&self.inner.streams)
            .iter()
            .map(|s| s.info.name.clone())
            .collect()
    }

    /// Samples discarded because an inlet buffer was full.
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTransport for MemoryBus {
    type Outlet = MemoryOutlet;
    type Inlet = MemoryInlet;

    fn declare_outlet(&self, info: StreamInfo) -> Result<MemoryOutlet, StreamError> {
        if info.channel_count == 0 {
            return Err(StreamError::NoChannels);
        }

        let shared = Arc::new(OutletShared {
            info,
            subscribers: Mutex::new(Vec::new()),
        });
        lock(&self.inner.streams).push(shared.clone());
        self.inner.declared.notify_all();

        info!(
            stream = %shared.info.name,
            channels = shared.info.channel_count,
            source_id = %shared.info.source_id,
            "Declared outlet"
        );

        Ok(MemoryOutlet {
            shared,
            bus: self.inner.clone(),
        })
    }

    fn resolve_inlet(&self, name: &str, timeout: Duration) -> Result<MemoryInlet, StreamError> {
        let deadline = Instant::now() + timeout;
        let mut streams = lock(&self.inner.streams);

        loop {
            if let Some(stream) = streams.iter().find(|s| s.info.name == name) {
                let (sender, receiver) = bounded(self.inlet_buffer);
                let alive = Arc::new(());
                lock(&stream.subscribers).push(Subscriber {
                    sender,
                    evict: receiver.clone(),
                    alive: Arc::downgrade(&alive),
                });
                debug!(stream = %name, uid = %stream.info.uid, "Resolved inlet");
                return Ok(MemoryInlet {
                    info: stream.info.clone(),
                    receiver,
                    _alive: alive,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StreamError::NotFound {
                    name: name.to_string(),
                    timeout,
                });
            }

            streams = self
                .inner
                .declared
                .wait_timeout(streams, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Producer end of an in-process stream. Dropping it closes the stream.
pub struct MemoryOutlet {
    shared: Arc<OutletShared>,
    bus: Arc<BusInner>,
}

impl Outlet for MemoryOutlet {
    fn info(&self) -> &StreamInfo {
        &self.shared.info
    }

    fn push(&self, values: &[f64]) -> Result<(), StreamError> {
        let info = &self.shared.info;
        if values.len() != info.channel_count {
            return Err(StreamError::ChannelCount {
                name: info.name.clone(),
                expected: info.channel_count,
                actual: values.len(),
            });
        }

        let sample = StreamSample {
            timestamp: local_clock(),
            values: values.to_vec(),
        };

        let mut subscribers = lock(&self.shared.subscribers);
        subscribers.retain(Subscriber::is_alive);
        for subscriber in subscribers.iter() {
            if subscriber.deliver(sample.clone()) {
                self.bus.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    fn has_consumers(&self) -> bool {
        lock(&self.shared.subscribers)
            .iter()
            .any(Subscriber::is_alive)
    }
}

impl Drop for MemoryOutlet {
    fn drop(&mut self) {
        lock(&self.bus.streams).retain(|s| !Arc::ptr_eq(s, &self.shared));
        // Inlets see the stream as closed once their senders go away
        lock(&self.shared.subscribers).clear();
        debug!(stream = %self.shared.info.name, "Outlet closed");
    }
}

/// Consumer end of an in-process stream.
pub struct MemoryInlet {
    info: StreamInfo,
    receiver: Receiver<StreamSample>,
    _alive: Arc<()>,
}

impl Inlet for MemoryInlet {
    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn pull(&self) -> Result<StreamSample, StreamError> {
        self.receiver
            .recv()
            .map_err(|_| StreamError::Closed(self.info.name.clone()))
    }

    fn pull_timeout(&self, timeout: Duration) -> Result<StreamSample, StreamError> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => StreamError::Timeout(self.info.name.clone()),
            RecvTimeoutError::Disconnected => StreamError::Closed(self.info.name.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::TAG_STREAM_TYPE;
    use std::thread;

    const WAIT: Duration = Duration::from_millis(500);

    fn info(name: &str, channels: usize) -> StreamInfo {
        StreamInfo::new(name, TAG_STREAM_TYPE, channels, "test")
    }

    #[test]
    fn test_fan_out_to_every_inlet() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Movement", 3)).unwrap();
        let a = bus.resolve_inlet("Movement", WAIT).unwrap();
        let b = bus.resolve_inlet("Movement", WAIT).unwrap();
        assert!(outlet.has_consumers());

        outlet.push(&[1.0, 2.0, 3.0]).unwrap();
        outlet.push(&[4.0, 5.0, 6.0]).unwrap();

        for inlet in [&a, &b] {
            assert_eq!(inlet.pull().unwrap().values, vec![1.0, 2.0, 3.0]);
            assert_eq!(inlet.pull().unwrap().values, vec![4.0, 5.0, 6.0]);
        }
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Temperature", 1)).unwrap();
        let inlet = bus.resolve_inlet("Temperature", WAIT).unwrap();

        for i in 0..20 {
            outlet.push(&[i as f64]).unwrap();
        }
        let mut last = f64::MIN;
        for i in 0..20 {
            let sample = inlet.pull().unwrap();
            assert_eq!(sample.values, vec![i as f64]);
            assert!(sample.timestamp >= last);
            last = sample.timestamp;
        }
    }

    #[test]
    fn test_resolve_missing_stream_times_out() {
        let bus = MemoryBus::new();
        let err = bus
            .resolve_inlet("Optical", Duration::from_millis(20))
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::NotFound { .. }));
    }

    #[test]
    fn test_resolve_waits_for_late_outlet() {
        let bus = MemoryBus::new();
        let producer = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let outlet = producer.declare_outlet(info("Humidity", 1)).unwrap();
            thread::sleep(Duration::from_millis(200));
            outlet.push(&[50.0]).unwrap();
            outlet
        });

        let inlet = bus.resolve_inlet("Humidity", Duration::from_secs(2)).unwrap();
        assert_eq!(inlet.info().channel_count, 1);
        assert_eq!(inlet.pull().unwrap().values, vec![50.0]);
        drop(handle.join().unwrap());
    }

    #[test]
    fn test_wrong_channel_count_rejected() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Movement", 3)).unwrap();
        let err = outlet.push(&[1.0]).unwrap_err();
        assert_eq!(
            err,
            StreamError::ChannelCount {
                name: "Movement".to_string(),
                expected: 3,
                actual: 1
            }
        );
        assert!(matches!(
            bus.declare_outlet(info("Empty", 0)),
            Err(StreamError::NoChannels)
        ));
    }

    #[test]
    fn test_dropping_outlet_closes_inlets() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Optical", 1)).unwrap();
        let inlet = bus.resolve_inlet("Optical", WAIT).unwrap();
        outlet.push(&[2.57]).unwrap();
        drop(outlet);

        assert!(bus.stream_names().is_empty());
        // buffered samples are still delivered
        assert_eq!(inlet.pull().unwrap().values, vec![2.57]);
        assert_eq!(
            inlet.pull().unwrap_err(),
            StreamError::Closed("Optical".to_string())
        );
    }

    #[test]
    fn test_pull_timeout() {
        let bus = MemoryBus::new();
        let _outlet = bus.declare_outlet(info("Battery", 1)).unwrap();
        let inlet = bus.resolve_inlet("Battery", WAIT).unwrap();
        assert_eq!(
            inlet.pull_timeout(Duration::from_millis(10)).unwrap_err(),
            StreamError::Timeout("Battery".to_string())
        );
    }

    #[test]
    fn test_slow_inlet_drops_oldest() {
        let bus = MemoryBus::with_inlet_buffer(2);
        let outlet = bus.declare_outlet(info("Temperature", 1)).unwrap();
        let inlet = bus.resolve_inlet("Temperature", WAIT).unwrap();

        for v in [1.0, 2.0, 3.0] {
            outlet.push(&[v]).unwrap();
        }
        assert_eq!(bus.dropped_samples(), 1);
        assert_eq!(inlet.pull().unwrap().values, vec![2.0]);
        assert_eq!(inlet.pull().unwrap().values, vec![3.0]);
    }

    #[test]
    fn test_lagging_inlet_sees_latest_samples() {
        let bus = MemoryBus::with_inlet_buffer(4);
        let outlet = bus.declare_outlet(info("Optical", 1)).unwrap();
        let lagging = bus.resolve_inlet("Optical", WAIT).unwrap();

        for i in 0..100 {
            outlet.push(&[i as f64]).unwrap();
        }

        let pulled: Vec<f64> = (0..4)
            .map(|_| lagging.pull_timeout(WAIT).unwrap().values[0])
            .collect();
        assert_eq!(pulled, vec![96.0, 97.0, 98.0, 99.0]);
        assert_eq!(bus.dropped_samples(), 96);
        assert_eq!(
            lagging.pull_timeout(Duration::from_millis(10)).unwrap_err(),
            StreamError::Timeout("Optical".to_string())
        );
    }

    #[test]
    fn test_eviction_is_per_inlet() {
        let bus = MemoryBus::with_inlet_buffer(2);
        let outlet = bus.declare_outlet(info("Battery", 1)).unwrap();
        let fast = bus.resolve_inlet("Battery", WAIT).unwrap();
        let slow = bus.resolve_inlet("Battery", WAIT).unwrap();

        for v in [1.0, 2.0, 3.0] {
            outlet.push(&[v]).unwrap();
            assert_eq!(fast.pull().unwrap().values, vec![v]);
        }
        assert_eq!(bus.dropped_samples(), 1);
        assert_eq!(slow.pull().unwrap().values, vec![2.0]);
        assert_eq!(slow.pull().unwrap().values, vec![3.0]);
    }

    #[test]
    fn test_dropped_inlet_is_pruned() {
        let bus = MemoryBus::new();
        let outlet = bus.declare_outlet(info("Temperature", 1)).unwrap();
        let inlet = bus.resolve_inlet("Temperature", WAIT).unwrap();
        assert!(outlet.has_consumers());
        drop(inlet);

        assert!(!outlet.has_consumers());
        outlet.push(&[1.0]).unwrap();
        assert_eq!(bus.dropped_samples(), 0);
    }
}

//! Demonstration of the SensorTag Bridge pipeline.
//!
//! This example shows how to:
//! 1. Open and arm a device session
//! 2. Publish sensor readings as named streams
//! 3. Resolve the streams and collect them cycle by cycle
//! 4. Read plot-ready series back out of the rolling window
//!
//! Run with: cargo run --example stream_demo
//!
//! Uses the simulated SensorTag, so no BLE adapter is needed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sensortag_bridge::{
    config::{CollectorConfig, PublisherConfig},
    create_shared_stats, ContinuousPublisher, DeviceSession, MemoryBus, MemoryInlet, MemoryOutlet,
    SensorKind, SimulatedSensorTag, StreamCollector,
};

const ADDRESS: &str = "CC:78:AB:7F:75:03";
const CYCLES: u64 = 30;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SensorTag Bridge - Stream Demo");
    println!("==============================");
    println!();

    // Open the device
    let tag = SimulatedSensorTag::new(ADDRESS).animated();
    let mut session = DeviceSession::new(tag)?;
    session.connect(ADDRESS, Duration::from_secs(4))?;
    session.arm_sensors()?;

    println!("Connected to {ADDRESS}");
    println!("  Characteristics: {}", session.characteristics().len());
    println!("  {}", session.acquire(SensorKind::ModelNumber)?);
    println!("  {}", session.acquire(SensorKind::Battery)?);
    println!();

    // Wire publisher and collector over an in-process bus
    let bus = MemoryBus::new();
    let stats = create_shared_stats();

    let publisher_config = PublisherConfig {
        sensors: vec![SensorKind::Movement, SensorKind::Temperature],
        ..PublisherConfig::default()
    };
    let mut publisher: ContinuousPublisher<_, MemoryOutlet> =
        ContinuousPublisher::new(session, &bus, &publisher_config, stats.clone())?;

    for info in publisher.streams() {
        println!(
            "  Outlet '{}' ({} channels, source {})",
            info.name, info.channel_count, info.source_id
        );
    }
    println!();

    let collector_config = CollectorConfig {
        streams: vec!["Movement".to_string(), "Temperature".to_string()],
        window_capacity: 20,
        pull_timeout: Some(Duration::from_secs(1)),
        ..CollectorConfig::default()
    };
    let mut collector: StreamCollector<MemoryInlet> =
        StreamCollector::resolve(&bus, &collector_config, stats.clone())?;

    // Set up stop flag
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    println!("Collecting {CYCLES} cycles...");
    println!();

    let mut cycles = 0;
    while running.load(Ordering::SeqCst) && cycles < CYCLES {
        publisher.step()?;
        let cycle = collector.collect()?;
        cycles += 1;

        if cycles <= 5 || cycles % 10 == 0 {
            let movement = &cycle["Movement"];
            let temperature = &cycle["Temperature"];
            println!(
                "  [{:>7.3}] accel z/y/x: {:>6.3} {:>6.3} {:>6.3}  ambient: {:.2} C",
                movement.arrival,
                movement.values[0],
                movement.values[1],
                movement.values[2],
                temperature.values[0]
            );
        }
    }

    // Plot-ready series of the first movement channel
    let series = collector
        .window()
        .series(|cycle| cycle.first().and_then(|s| s.values.first().copied()));
    println!();
    println!("=== Window ===");
    println!("  Entries: {} of {}", series.len(), collector.window().capacity());
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        println!("  Span: {:.3}s", last.0 - first.0);
    }
    let peak = series.iter().map(|(_, v)| v.abs()).fold(0.0, f64::max);
    println!("  Peak |accel z|: {peak:.3} g");
    println!();

    println!("{}", stats.summary());
    Ok(())
}

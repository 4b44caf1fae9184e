//! SensorTag Bridge CLI
//!
//! Stream SensorTag readings through named sample streams.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use sensortag_bridge::{
    collector::{Cycle, StreamCollector},
    config::{Config, DeviceConfig},
    create_shared_stats,
    sensor::{decode, parse_sensor_list, SensorKind},
    ContinuousPublisher, DeviceSession, Error, MemoryBus, MemoryInlet, MemoryOutlet,
    SetupError, SimulatedSensorTag, StreamError, VERSION,
};

#[derive(Parser)]
#[command(name = "sensortag-bridge")]
#[command(version = VERSION)]
#[command(about = "Stream SensorTag readings as named sample streams", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sensors the bridge knows about
    Sensors,

    /// Connect, arm and print decoded readings
    Read {
        /// Sensor to read (e.g. Temperature, Movement, ModelNumber)
        #[arg(long, default_value = "Temperature")]
        sensor: SensorKind,

        /// Number of readings to take
        #[arg(long, default_value = "1")]
        count: u32,

        /// Also print the raw payload bytes
        #[arg(long)]
        raw: bool,
    },

    /// Publish sensor streams and collect them into a rolling window
    Stream {
        /// Sensors to publish, comma separated (overrides config)
        #[arg(long)]
        sensors: Option<String>,

        /// Stop after this many collected cycles
        #[arg(long)]
        cycles: Option<u64>,

        /// Rolling window capacity (overrides config)
        #[arg(long)]
        capacity: Option<usize>,

        /// Stream every channel instead of the first three
        #[arg(long)]
        full_channels: bool,

        /// Write the final window contents to this JSON file
        #[arg(long, short)]
        export: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Write the current configuration to disk
        #[arg(long)]
        init: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "sensortag_bridge=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Sensors => cmd_sensors(),
        Commands::Read { sensor, count, raw } => {
            let config = load_config(config_path)?;
            cmd_read(&config.device, sensor, count, raw)
        }
        Commands::Stream {
            sensors,
            cycles,
            capacity,
            full_channels,
            export,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(list) = sensors {
                config.publisher.sensors = parse_sensor_list(&list)?;
            }
            if let Some(capacity) = capacity {
                config.collector.window_capacity = capacity;
            }
            if full_channels {
                config.publisher.full_channels = true;
            }
            cmd_stream(config, cycles, export)
        }
        Commands::Config { init } => cmd_config(config_path, init),
    }
}

/// Load from `--config` if given, otherwise from the user config directory.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let shown = path.map_or_else(Config::config_path, Path::to_path_buf);
    if shown.exists() {
        info!(path = ?shown, "Loading configuration");
    } else {
        info!("No configuration file found, using defaults");
    }

    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .with_context(|| format!("loading {}", shown.display()))
}

fn cmd_sensors() -> anyhow::Result<()> {
    println!("{:<12} {:>8}  {:<38} {}", "Sensor", "Channels", "Characteristic", "Streamable");
    for sensor in SensorKind::ALL {
        println!(
            "{:<12} {:>8}  {:<38} {}",
            sensor.name(),
            sensor.channel_count(),
            sensor.characteristic(),
            if sensor.is_streamable() { "yes" } else { "no" }
        );
    }
    Ok(())
}

/// Read latency of the simulated device, close to a real SensorTag's GATT round trip.
const SIMULATED_READ_LATENCY: Duration = Duration::from_millis(10);

/// Open a connected, armed session on the configured device.
///
/// There is no hardware transport yet, so this is always the simulated tag.
fn open_session(device: &DeviceConfig) -> anyhow::Result<DeviceSession<SimulatedSensorTag>> {
    let tag = SimulatedSensorTag::new(device.address.clone())
        .with_read_latency(SIMULATED_READ_LATENCY)
        .animated();
    let mut session = DeviceSession::new(tag)?;
    session
        .connect(&device.address, device.connect_timeout)
        .with_context(|| format!("connecting to {}", device.address))?;
    session.arm_sensors()?;
    Ok(session)
}

/// Header line naming the device. Only the simulated transport exists here.
fn device_line(device: &DeviceConfig) -> String {
    format!("Device: {} (simulated)", device.address)
}

fn cmd_read(device: &DeviceConfig, sensor: SensorKind, count: u32, raw: bool) -> anyhow::Result<()> {
    println!("SensorTag Bridge v{VERSION}");
    println!("{}", device_line(device));
    println!();

    let mut session = open_session(device)?;
    for _ in 0..count {
        let payload = session.read(sensor)?;
        if raw {
            let hex: Vec<String> = payload.iter().map(|b| format!("{b:02x}")).collect();
            println!("raw: {}", hex.join(" "));
        }
        let reading = decode(sensor, &payload)?;
        println!("{reading}");
    }

    session.close();
    Ok(())
}

fn cmd_stream(config: Config, cycles: Option<u64>, export: Option<PathBuf>) -> anyhow::Result<()> {
    println!("SensorTag Bridge v{VERSION}");
    println!("{}", device_line(&config.device));
    println!(
        "Streams: {}",
        config
            .publisher
            .sensors
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Window capacity: {}", config.collector.window_capacity);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let mut collector_config = config.collector.clone();
    collector_config.streams = config
        .publisher
        .sensors
        .iter()
        .map(|s| s.name().to_string())
        .collect();

    let bus = MemoryBus::with_inlet_buffer(collector_config.inlet_buffer);
    let stats = create_shared_stats();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let session = open_session(&config.device)?;
    let mut publisher: ContinuousPublisher<_, MemoryOutlet> =
        ContinuousPublisher::new(session, &bus, &config.publisher, stats.clone())
            .map_err(SetupError::into_error)?;

    let mut collector: StreamCollector<MemoryInlet> =
        StreamCollector::resolve(&bus, &collector_config, stats.clone())?;
    let followed: Vec<&str> = collector.stream_names().collect();
    println!("Following: {}", followed.join(", "));
    println!();

    let publisher_running = running.clone();
    let publisher_thread = thread::Builder::new()
        .name("publisher".to_string())
        .spawn(move || {
            let result = publisher.run(&publisher_running);
            // Outlets close here, which releases a collector blocked on pull
            drop(publisher);
            result
        })
        .context("spawning publisher thread")?;

    let mut collected = 0u64;
    let collected_result = collector.run(&running, |cycle, window| {
        collected += 1;
        print_cycle(cycle, window.len());
        if cycles.is_some_and(|max| collected >= max) {
            running.store(false, Ordering::SeqCst);
        }
    });

    running.store(false, Ordering::SeqCst);
    let published = publisher_thread
        .join()
        .map_err(|_| anyhow!("publisher thread panicked"))?;

    if let Err(e) = published {
        return Err(e).context("publisher stopped");
    }
    match collected_result {
        Ok(_) => {}
        // Shutting down the publisher closes the streams under a blocked pull
        Err(Error::Stream(StreamError::Closed(name))) => {
            info!(stream = %name, "Stream closed during shutdown");
        }
        Err(e) => return Err(e).context("collector stopped"),
    }

    println!();
    println!("{}", stats.summary());
    println!("- Samples dropped: {}", bus.dropped_samples());

    if let Some(path) = export {
        let snapshot = collector.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("Exported {} cycles to {:?}", snapshot.len(), path);
    }

    Ok(())
}

fn print_cycle(cycle: &Cycle, window_len: usize) {
    let arrival = cycle
        .values()
        .map(|s| s.arrival)
        .fold(f64::MIN, f64::max);
    let streams: Vec<String> = cycle
        .values()
        .map(|s| {
            let values: Vec<String> = s.values.iter().map(|v| format!("{v:.3}")).collect();
            format!("{}: [{}]", s.stream, values.join(", "))
        })
        .collect();
    println!("[{arrival:>9.3}] {} ({window_len} in window)", streams.join(" | "));
}

fn cmd_config(path: Option<&Path>, init: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let shown = path.map_or_else(Config::config_path, Path::to_path_buf);

    if init {
        match path {
            Some(path) => config.save_to(path),
            None => config.save(),
        }
        .with_context(|| format!("writing {}", shown.display()))?;
        println!("Wrote configuration to {shown:?}");
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {shown:?}");
    if !shown.exists() {
        warn!("Config file does not exist, showing defaults");
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}

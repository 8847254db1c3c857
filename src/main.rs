use anyhow::{Context, Result};
use clap::Parser;
use depthcam::driver::DEFAULT_SIMULATED_PORT;
use depthcam::{
    DepthcamConfig, DeviceIdentity, FrameFormatDescriptor, SensorError, SensorHandle,
    SensorRegistry, SensorStatus, SimulatedDriver, SimulatedProducer, StreamKind, Timestamp,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "depthcam")]
#[command(about = "Depth-camera sensor lifecycle and stream manager")]
#[command(version)]
#[command(long_about = "Opens a depth-camera sensor, tracks its status through hot-plug, \
power and bandwidth changes, and pulls color, depth, infrared and skeletal frames from it. \
Runs against the built-in simulated device.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "depthcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening a sensor")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// List sensor ports as JSON and exit
    #[arg(long, help = "Enumerate sensor ports as JSON and exit")]
    list: bool,

    /// Stop after this many frames across all streams
    #[arg(long, value_name = "N", help = "Stop after N frames have been read")]
    frames: Option<u64>,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[derive(Debug, Default)]
struct StreamStats {
    frames: u64,
    first_timestamp: Option<Timestamp>,
    last_timestamp: Option<Timestamp>,
}

impl StreamStats {
    fn record(&mut self, timestamp: Timestamp) {
        self.frames += 1;
        self.first_timestamp.get_or_insert(timestamp);
        self.last_timestamp = Some(timestamp);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting depthcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match DepthcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().context("invalid configuration")?;

    let driver = Arc::new(SimulatedDriver::new());
    let port = driver.add_port(
        config
            .sensor
            .port_id
            .as_deref()
            .unwrap_or(DEFAULT_SIMULATED_PORT),
    )?;
    let registry = SensorRegistry::new(Arc::clone(&driver), config.system.event_bus_capacity);
    driver.attach(registry.hardware_sink());

    if args.list {
        println!("{}", serde_json::to_string_pretty(&registry.enumerate())?);
        return Ok(());
    }

    let event_logger = spawn_event_logger(&registry);

    let handle = match &config.sensor.port_id {
        Some(id) => registry.open(&DeviceIdentity::new(id.as_str())?)?,
        None => registry.open_by_index(config.sensor.index)?,
    };

    driver.connect(&port);
    wait_for_started(&registry, handle, Duration::from_secs(5)).await?;

    let producer = SimulatedProducer::spawn(Arc::clone(&driver), config.system.simulated_fps)?;

    let result = run(&registry, handle, &config, args.frames).await;

    producer.stop();
    registry.close(handle)?;
    event_logger.abort();

    let stats = result?;
    for (kind, stats) in &stats {
        info!(
            "{} stream: {} frames (timestamps {:?}..{:?})",
            kind, stats.frames, stats.first_timestamp, stats.last_timestamp
        );
    }

    info!("depthcam exited cleanly");
    Ok(())
}

async fn run(
    registry: &SensorRegistry,
    handle: SensorHandle,
    config: &DepthcamConfig,
    frame_limit: Option<u64>,
) -> Result<BTreeMap<StreamKind, StreamStats>> {
    let mut buffers: Vec<(StreamKind, Vec<u8>)> = Vec::new();

    if config.color.enabled {
        let format = registry.enable_color_stream(handle, config.color.resolution)?;
        buffers.push((StreamKind::Color, allocate(StreamKind::Color, &format)));
    }
    if config.depth.enabled {
        let format = registry.enable_depth_stream(
            handle,
            config.depth.near_mode,
            config.depth.resolution,
        )?;
        buffers.push((StreamKind::Depth, allocate(StreamKind::Depth, &format)));
    }
    if config.infrared.enabled {
        let format = registry.enable_ir_stream(handle, config.infrared.resolution)?;
        buffers.push((StreamKind::Infrared, allocate(StreamKind::Infrared, &format)));
    }
    if config.skeleton.enabled {
        registry.enable_skeletal_stream(handle, config.skeleton.skeletal_config())?;
    }

    let enabled = registry.enabled_streams(handle)?;
    if enabled.is_empty() {
        warn!("No streams enabled in configuration, nothing to read");
        return Ok(BTreeMap::new());
    }

    let mut stats: BTreeMap<StreamKind, StreamStats> = BTreeMap::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(config.system.poll_interval_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let status = registry.status(handle)?;
                if status != SensorStatus::Started {
                    warn!("Sensor is {}, stopping", status);
                    break;
                }

                poll_frames(registry, handle, &mut buffers, &mut stats)?;

                let total: u64 = stats.values().map(|s| s.frames).sum();
                if frame_limit.map_or(false, |limit| total >= limit) {
                    info!("Read {} frames, stopping", total);
                    break;
                }
            }
        }
    }

    Ok(stats)
}

fn allocate(kind: StreamKind, format: &FrameFormatDescriptor) -> Vec<u8> {
    info!("{} stream negotiated {}", kind, format);
    format.allocate()
}

fn poll_frames(
    registry: &SensorRegistry,
    handle: SensorHandle,
    buffers: &mut [(StreamKind, Vec<u8>)],
    stats: &mut BTreeMap<StreamKind, StreamStats>,
) -> Result<()> {
    for (kind, buffer) in buffers.iter_mut() {
        let read = match kind {
            StreamKind::Color => registry.get_color_frame(handle, buffer),
            StreamKind::Depth => registry.get_depth_frame(handle, buffer),
            StreamKind::Infrared => registry.get_ir_frame(handle, buffer),
            StreamKind::Skeleton => continue,
        };

        match read {
            Ok(timestamp) => {
                debug!("{} frame at {}", kind, timestamp);
                stats.entry(*kind).or_default().record(timestamp);
            }
            Err(SensorError::NoFrameAvailable { .. }) => {}
            Err(e) => return Err(e.into()),
        }
    }

    match registry.get_skeleton_frame(handle) {
        Ok(frame) => {
            debug!(
                "Skeleton frame {} with {} tracked bodies",
                frame.frame_number,
                frame.tracked_bodies().count()
            );
            stats
                .entry(StreamKind::Skeleton)
                .or_default()
                .record(frame.frame_number as Timestamp);
        }
        Err(SensorError::NoFrameAvailable { .. } | SensorError::StreamNotEnabled { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

async fn poll_until_started(
    registry: &SensorRegistry,
    handle: SensorHandle,
) -> std::result::Result<(), SensorError> {
    loop {
        let status = registry.status(handle)?;
        if status == SensorStatus::Started {
            return Ok(());
        }
        if status.is_terminal() {
            return Err(SensorError::InvalidState { status });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_started(
    registry: &SensorRegistry,
    handle: SensorHandle,
    limit: Duration,
) -> Result<()> {
    tokio::time::timeout(limit, poll_until_started(registry, handle))
        .await
        .context("sensor did not start in time")??;
    info!("Sensor {} started", handle);
    Ok(())
}

fn spawn_event_logger(registry: &SensorRegistry) -> tokio::task::JoinHandle<()> {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!("Event: {}", event.description());
        }
    })
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("depthcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# depthcam configuration file");
    println!("# Environment overrides: DEPTHCAM_<SECTION>__<KEY>, e.g. DEPTHCAM_DEPTH__NEAR_MODE=true");
    println!();
    println!("{}", toml::to_string_pretty(&DepthcamConfig::default())?);
    Ok(())
}

//! # FarDriver Monitor
//!
//! Headless monitor for FarDriver motor controllers.
//!
//! Connects through a serial bridge, logs every telemetry change and can
//! record the ride to CSV.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration and apply command line overrides
//!    - Set up logging (stderr, plus a daily log file if configured)
//!    - Spawn the connection session and request a connection
//!
//! 2. **Main Loop**
//!    - Poll for changes on the display tick and log the snapshot
//!    - Report link staleness and periodic performance figures
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Graceful Shutdown**
//!    - Stop (and optionally export) the recording
//!    - Shut the session down, closing the port

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use fardriver_telemetry::config::{Config, LoggingConfig};
use fardriver_telemetry::error::RecorderError;
use fardriver_telemetry::serial::SerialTransport;
use fardriver_telemetry::{ConnectionSession, RecordTarget};

/// Snapshot poll period
const DISPLAY_TICK_MS: u64 = 100;

/// Ticks between performance log lines (10 s)
const PERFORMANCE_LOG_TICKS: u64 = 100;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the controller bridge, e.g. /dev/rfcomm0
    #[arg(short, long)]
    port: Option<String>,

    /// Record every telemetry change
    #[arg(short, long)]
    record: bool,

    /// Keep the recording in memory instead of writing a CSV file
    #[arg(long, requires = "record")]
    memory_only: bool,

    /// Recording file; with --memory-only, the export written on exit (.csv or .json)
    #[arg(short, long, requires = "record")]
    output: Option<PathBuf>,
}

impl Args {
    fn record_target(&self) -> RecordTarget {
        match (&self.output, self.memory_only) {
            (_, true) => RecordTarget::MemoryOnly,
            (Some(output), false) => RecordTarget::File(output.clone()),
            (None, false) => RecordTarget::Default,
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Install the tracing subscriber
///
/// The returned guard must be held until exit so buffered file output is
/// flushed.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fardriver-monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

fn start_recording(session: &ConnectionSession, target: RecordTarget) -> Result<()> {
    match session.start_recording(target) {
        Ok(Some(path)) => info!("Recording to {}", path.display()),
        Ok(None) => info!("Recording in memory"),
        Err(e @ RecorderError::SinkUnavailable { .. }) => {
            warn!("{}; falling back to memory-only recording", e);
            session.start_recording(RecordTarget::MemoryOnly)?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = init_logging(&config.logging);

    info!("FarDriver Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let transport = SerialTransport::new(config.serial.clone(), &config.device);
    let session = ConnectionSession::spawn(transport, &config);
    session.connect();

    if args.record {
        start_recording(&session, args.record_target())?;
    }

    let mut display_tick = interval(Duration::from_millis(DISPLAY_TICK_MS));
    let mut ticks: u64 = 0;
    let mut connected = false;

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = display_tick.tick() => {
                ticks += 1;

                if session.consume_changed() {
                    let s = session.snapshot();
                    info!(
                        "{:5.1} km/h | {:5} rpm | gear {} | {:7.1} W | {:5.1} V ({:3.0}%) | throttle {:3.0}% | ctrl {}°C motor {}°C",
                        s.speed,
                        s.rpm,
                        s.gear,
                        s.power,
                        s.voltage,
                        s.battery_level() * 100.0,
                        s.throttle_percent(),
                        s.controller_temp,
                        s.motor_temp,
                    );
                }

                let now_connected = session.is_connected();
                if now_connected != connected {
                    if now_connected {
                        info!("Receiving data");
                    } else {
                        warn!("No data from controller ({})", session.state());
                    }
                    connected = now_connected;
                }

                if ticks % PERFORMANCE_LOG_TICKS == 0 {
                    let perf = session.performance();
                    let stats = session.stats();
                    info!(
                        "Performance - Packets: {}, Errors: {}, Checksum errors: {}, Latency: {:.1}ms, Rate: {:.1}/s",
                        perf.packet_count,
                        perf.packet_errors,
                        stats.checksum_errors,
                        perf.avg_latency_ms,
                        perf.packet_rate,
                    );
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    if session.is_recording() {
        let samples = session.stop_recording();
        if let (true, Some(output)) = (args.memory_only, &args.output) {
            match session.export_recording(output) {
                Ok(count) => info!("Saved {} samples to {}", count, output.display()),
                Err(e) => warn!("Failed to export recording: {}", e),
            }
        } else {
            info!("Recorded {} samples", samples);
        }
    }

    session.shutdown().await;
    info!("Total packets received: {}", session.performance().packet_count);

    Ok(())
}

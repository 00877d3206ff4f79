//! Ambilink Daemon
//!
//! Streams captured screen colors to an Ambilink controller board over a
//! serial link.
//!
//! Signals: `SIGUSR1` requests a diagnostic line from the board, `SIGUSR2`
//! writes the live preview as PNG, `SIGINT`/`SIGTERM` stop the session and
//! exit.

mod capture;
mod config;
mod pump;
mod service;

use ambilink_hw::SerialConnector;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use capture::TestPattern;
use config::{CaptureSource, Config};
use service::{LightsService, SessionSettings};

/// How often the daemon checks whether capture is still running.
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "ambilinkd")]
#[command(about = "Streams screen colors to an Ambilink controller board")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Serial port to open (overrides link.port)
    #[arg(short, long)]
    port: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive("info".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = Config::load_or_default(&cli.config).context("Failed to load configuration")?;
    info!("Loaded configuration from: {}", cli.config.display());
    if let Some(port) = cli.port {
        config.link.port = Some(port);
    }

    let Some(port) = config.link.port.clone() else {
        warn!("No serial port configured; set link.port or pass --port");
        return Ok(());
    };

    let settings = SessionSettings::from_config(&config)?;
    let connector = SerialConnector::new(config.link.baud, config.link.timeout());
    let engine = match config.capture.source {
        CaptureSource::Pattern => match config.capture.frames {
            Some(frames) => TestPattern::with_limit(frames),
            None => TestPattern::new(),
        },
    };
    let service = LightsService::new(settings, Box::new(connector), engine);

    service
        .start_session(&port)
        .with_context(|| format!("Failed to start session on {}", port))?;

    // Board answers to SIGUSR1 go to stdout
    let mut debug_lines = service
        .subscribe_debug()
        .context("Session ended before it could be observed")?;

    // Setup Unix signal handlers
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;
    let mut status = tokio::time::interval(STATUS_INTERVAL);

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigusr1.recv() => {
                if !service.request_debug_info() {
                    info!("Debug request dropped, link busy");
                }
            }
            Ok(line) = debug_lines.recv() => {
                println!("{}", line);
            }
            _ = sigusr2.recv() => {
                if let Err(e) = service.save_preview(&config.preview.path) {
                    warn!("Failed to save preview: {}", e);
                }
            }
            _ = status.tick() => {
                if !service.is_session_active() {
                    warn!("No longer capturing, shutting down");
                    break;
                }
            }
        }
    }

    service.stop_session();
    Ok(())
}

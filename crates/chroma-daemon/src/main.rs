//! Chroma Daemon - Main entry point
//!
//! Enumerates attached color sensors and keeps them registered, or runs a
//! single list / measure / dump pass and exits.

mod config;
mod service;

use anyhow::Result;
use chroma_sensors::SensorCap;
use chroma_usb::{RusbContext, UsbContext};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::service::SensorService;

#[derive(Parser, Debug)]
#[command(name = "chromad")]
#[command(about = "Color sensor daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "chromad.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// List attached sensors and exit
    #[arg(long)]
    list: bool,

    /// Take one sample in the given mode from every sensor and exit
    #[arg(long, value_name = "CAP")]
    measure: Option<SensorCap>,

    /// Print a diagnostic dump of every sensor and exit
    #[arg(long)]
    dump: bool,

    /// Write the default configuration to a file and exit
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.write_config {
        config::save_default_config(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let config = config::load_config(&args.config)?;

    let level = parse_level(args.log_level.as_deref().unwrap_or(&config.logging.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("chromad v{}", env!("CARGO_PKG_VERSION"));
    info!(
        path = %args.config.display(),
        rescan = config.daemon.rescan_interval_secs,
        "Configuration loaded"
    );

    let usb: Option<Arc<dyn UsbContext>> = match RusbContext::new() {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) => {
            warn!("USB unavailable, only virtual sensors will be used: {}", e);
            None
        }
    };
    let service = SensorService::new(config, usb);

    if !(args.list || args.dump || args.measure.is_some()) {
        return service.run().await;
    }

    service.register_dummy().await;
    service.rescan().await?;

    if args.list {
        let sensors = service.sensors().await;
        println!("Found {} sensors:", sensors.len());
        for s in sensors {
            println!("  - {} [{}] {} {}", s.id, s.kind, s.vendor, s.model);
            println!("    Capabilities: {}", s.caps);
        }
    }

    if let Some(cap) = args.measure {
        for id in service.sensor_ids().await {
            let handle = service.measure(&id, cap).await?;
            match handle.await? {
                Ok(xyz) => println!("{}: {}", id, xyz),
                Err(e) => eprintln!("{}: {}", id, e),
            }
        }
    }

    if args.dump {
        for id in service.sensor_ids().await {
            match service.dump(&id).await {
                Ok(text) => println!("# {}\n{}", id, text),
                Err(e) => eprintln!("{}: {}", id, e),
            }
        }
    }

    Ok(())
}

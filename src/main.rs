//!
//! Pose publisher entry point
//!
//! Load the config and calibration, connect the transport, then hand the blocking pose loop
//! its own thread while the runtime keeps the socket and Ctrl-C handling going.
//!

#[macro_use]
extern crate tracing;

use std::{error::Error, path::PathBuf};

use aruco_pose_publisher::{calibration::Calibration, config::Config, session};
use clap::Parser;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

// mimalloc is an excellent general purpose allocator
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file, instead of searching the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let loaded = Config::locate(args.config.as_deref());

    // Set up logging, RUST_LOG wins over the config file
    {
        let default_filter = match &loaded {
            Ok((cfg, _)) => cfg.log_filter.clone(),
            Err(_) => "info".to_owned(),
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
        let layer = tracing_subscriber::fmt::layer().with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }

    info!("starting up...");

    let (cfg, path) = loaded?;
    match path {
        Some(path) => debug!("loaded config from {}", path.display()),
        None => debug!("no config file found, using the defaults"),
    }

    let calibration = Calibration::load(&cfg.calibration)?;
    info!("extracted camera parameters from {}", cfg.calibration.display());

    let (publisher, nt) = session::connect_publisher(&cfg).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupt from keyboard, closing capture");
                    cancel.cancel();
                }
                Err(err) => error!("failed to listen for ctrl+c: {err}"),
            }
        });
    }

    // The pose loop blocks, keep it off the runtime's worker threads
    let result = tokio::task::spawn_blocking(move || session::run(&cfg, calibration, publisher, &cancel)).await?;

    if let Some(nt) = nt {
        nt.stop().await;
    }

    let summary = result?;
    info!(
        frames = summary.frames,
        published = summary.published,
        "stopped: {:?}",
        summary.exit
    );

    Ok(())
}

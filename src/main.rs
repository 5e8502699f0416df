//! mqtt-speaker-rs: speaks text and plays audio files requested over MQTT.

mod cache;
mod config;
mod dispatcher;
mod error;
mod logging;
mod player;
mod request;
mod resolver;
mod service;
mod synthesizer;
mod transport;

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mqtt-speaker-rs", about = "MQTT text-to-speech and audio playback agent")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logging settings live in the config file, so it is read first.
    let (config, warnings) = config::Config::load(args.config.as_deref());
    let _log_guard = logging::init(&config.logging, args.verbose);
    for warning in &warnings {
        warn!("{warning}");
    }

    info!("Config parsed. Starting text-to-speech.");
    config.log_summary();

    if let Err(e) = service::SpeakerService::new(config).run().await {
        error!("Startup failed: {e}");
        return Err(e);
    }

    Ok(())
}

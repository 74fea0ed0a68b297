mod countdown;
mod daemon;
mod devices;
mod diagnostics;
mod engine;
mod error;
mod playback;
mod server;
mod session;
mod synthesis;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use shared::{Catalog, Config};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::daemon::Daemon;
use crate::engine::DryRunEngine;

#[derive(Parser)]
#[command(name = "translator-daemon")]
#[command(about = "Speech translation session daemon")]
struct Args {
    /// Control socket path, overriding the config file
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Language/voice catalog in YAML, overriding the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Do not play synthesized audio locally
    #[arg(long)]
    no_playback: bool,

    /// Replay utterances from this file as recognized speech
    /// (`source => translation` per line, `!nomatch`, `!cancel <reason>`, `!end`)
    #[arg(long)]
    script: Option<PathBuf>,

    /// Milliseconds between scripted utterances
    #[arg(long, default_value_t = 1500)]
    pace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    info!("Starting translation daemon");

    let mut config = Config::load()?;
    if let Some(socket) = args.socket {
        config.ipc.socket_path = socket;
    }
    if args.no_playback {
        config.audio.playback = false;
    }
    if config.credentials().is_none() {
        warn!("No speech key or region configured; sessions will be rejected");
    }

    let catalog = match args.catalog.clone().or_else(|| config.speech.catalog_path.clone()) {
        Some(path) => Catalog::load(&path)?,
        None => Catalog::builtin()?,
    };

    let engine = match &args.script {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read script {:?}", path))?;
            let script = engine::parse_script(&content);
            info!("Loaded {} scripted steps from {:?}", script.len(), path);
            DryRunEngine::with_script(script, Duration::from_millis(args.pace_ms))
        }
        None => DryRunEngine::new(),
    };

    let socket_path = config.ipc.socket_path.clone();
    let listener = server::bind(&socket_path)?;
    let daemon = Arc::new(Daemon::new(
        config,
        catalog,
        Arc::new(engine),
        shared::load_preferences(),
    ));

    tokio::select! {
        _ = server::serve(listener, daemon.clone()) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = daemon.wait_for_shutdown() => info!("Shutdown requested"),
    }

    daemon.shutdown().await;
    if let Err(e) = std::fs::remove_file(&socket_path) {
        warn!("Failed to remove socket {:?}: {}", socket_path, e);
    }
    info!("Translation daemon stopped");
    Ok(())
}

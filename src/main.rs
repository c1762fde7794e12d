// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! FoosGate - Foosball goal detection and live score streaming
//!
//! Runs the photogates, the idle fan timer and the `/stream` endpoint until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use foosgate::hardware::{spawn_crossings, SimulatedFan, SimulatedInterfaceKit};
use foosgate::{Config, Engine, PowerSwitch, StreamServer, VERSION};

/// FoosGate - Foosball goal detection and live score streaming
#[derive(Parser, Debug)]
#[command(name = "foosgate")]
#[command(version = VERSION)]
#[command(about = "Debounced foosball goal detection streamed to live scoreboards")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run with simulated hardware
    #[arg(long)]
    demo: bool,

    /// Host for the server to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port for the server to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load or create configuration
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        config
            .log_level
            .parse::<Level>()
            .with_context(|| format!("Invalid log_level '{}' in {:?}", config.log_level, config_path))?
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("FoosGate v{}", VERSION);

    // Override with command line args
    if args.demo {
        config.demo_mode = true;
    }
    if let Some(host) = args.host {
        config.streaming.host = host;
    }
    if let Some(port) = args.port {
        config.streaming.port = port;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", config.demo_mode);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    if !config.demo_mode {
        bail!("No interface kit driver is linked into this build; run with --demo for simulated hardware");
    }

    let kit = Arc::new(SimulatedInterfaceKit::new(config.channel_count()));
    let fans: Vec<Arc<dyn PowerSwitch>> = config
        .gates
        .iter()
        .map(|g| Arc::new(SimulatedFan::new(&format!("{}-fan", g.name))) as Arc<dyn PowerSwitch>)
        .collect();

    let mut engine = Engine::new(config.clone(), kit.clone(), fans).await?;
    if let Err(e) = engine.start().await {
        error!("Startup aborted: {:#}", e);
        return Err(e);
    }

    let server = StreamServer::bind(&config.streaming, engine.status_handle())
        .await
        .context("Unable to start stream server")?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_task = tokio::spawn(server.run(shutdown_tx.subscribe()));

    let crossings = spawn_crossings(
        kit,
        config.gates.iter().map(|g| g.channels.clone()).collect(),
        Duration::from_millis(config.demo.crossing_interval_ms),
    );

    info!("FoosGate running, press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    crossings.abort();
    let _ = shutdown_tx.send(());
    match server_task.await {
        Ok(Err(e)) => error!("Stream server failed: {:#}", e),
        Err(e) => error!("Stream server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    engine.stop().await?;

    info!("FoosGate shutdown complete");
    Ok(())
}

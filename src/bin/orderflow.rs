//! Orderflow analytics engine daemon.
//!
//! Wires the feed workers, the engine worker, the observer hub, and the
//! CSV sink together, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use orderflow_engine::{
    init_logging, AppConfig, Book, Broadcaster, CsvSink, DepthIngest, Engine, Error, LogFormat,
    OiEngine, OiPoller, Result, Snapshot, SnapshotRing, TradeBus, TradeIngest,
};

#[derive(Parser)]
#[command(name = "orderflow")]
#[command(version, about = "Real-time orderflow analytics engine", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "orderflow.toml")]
    config: String,

    /// Override instrument symbol (lowercase, e.g. btcusdt)
    #[arg(long)]
    symbol: Option<String>,

    /// Override observer listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override snapshot history capacity
    #[arg(long)]
    ring_capacity: Option<usize>,

    /// Override CSV log directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "orderflow.toml")]
        output: String,
    },
    /// Validate config without running
    ValidateConfig,
    /// Run the engine (default)
    Run,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run_cli(cli).await {
        eprintln!("orderflow: {e}");
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(std::path::Path::new(&cli.config))?;
    apply_overrides(&mut config, &cli);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::GenerateConfig { output } => {
            std::fs::write(&output, config.to_toml()?).map_err(|e| Error::io(&e))?;
            println!("wrote sample config to {output}");
            Ok(())
        }
        Commands::ValidateConfig => {
            config.validate()?;
            println!("config ok");
            Ok(())
        }
        Commands::Run => {
            config.validate()?;
            let _guards = init_logging(&config.logging, None)?;
            run(config).await
        }
    }
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(symbol) = &cli.symbol {
        config.feeds.symbol = symbol.to_lowercase();
    }
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(capacity) = cli.ring_capacity {
        config.engine.ring_capacity = capacity;
    }
    if let Some(dir) = &cli.log_dir {
        config.sink.dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = match format.as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(symbol = %config.feeds.symbol, "starting orderflow engine");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Bind the observer transport first: it is the only fatal startup
    // error, so fail before any worker starts.
    let listener = Broadcaster::bind(&config.server.listen_addr).await?;

    let bus = Arc::new(TradeBus::new());
    let book = Book::new();
    let oi_engine = OiEngine::new();
    let engine = Engine::new(book.handle(), oi_engine.handle());

    // Restart recovery: pre-fill the ring from the newest CSV log.
    let ring = Arc::new(SnapshotRing::new(config.engine.ring_capacity));
    for snapshot in orderflow_engine::load_recent(&config.sink.dir, config.engine.ring_capacity) {
        ring.push(snapshot);
    }
    info!(restored = ring.len(), "ring buffer pre-loaded");

    let (csv_sink, csv_task) = CsvSink::spawn(config.sink.dir.clone(), shutdown_rx.clone());

    // Subscribe before ingest starts so the first trades are not lost.
    let trade_rx = bus.subscribe(config.engine.trade_queue);
    let (snapshot_tx, snapshot_rx) = mpsc::channel::<Snapshot>(config.engine.snapshot_queue);

    let trade_task = TradeIngest::new(config.feeds.trade_stream_url(), Arc::clone(&bus))
        .spawn(shutdown_rx.clone());
    let depth_task =
        DepthIngest::new(config.feeds.depth_stream_url(), book).spawn(shutdown_rx.clone());
    let oi_task = OiPoller::new(
        config.feeds.oi_url(),
        config.feeds.oi_poll_interval(),
        oi_engine,
        engine.price_slot(),
    )?
    .spawn(shutdown_rx.clone());

    let engine_task = tokio::spawn(orderflow_engine::engine::run_worker(
        engine,
        trade_rx,
        Arc::clone(&ring),
        snapshot_tx,
        csv_sink,
        shutdown_rx.clone(),
    ));

    let broadcaster = Broadcaster::new(Arc::clone(&ring), snapshot_rx);
    let broadcast_task = tokio::spawn(broadcaster.run(listener, shutdown_rx.clone()));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::io(&e))?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    for (name, task) in [
        ("trade ingest", trade_task),
        ("depth ingest", depth_task),
        ("oi poller", oi_task),
        ("engine", engine_task),
        ("broadcast", broadcast_task),
        ("csv sink", csv_task),
    ] {
        if let Err(e) = task.await {
            error!(worker = name, error = %e, "worker did not stop cleanly");
        }
    }

    Ok(())
}

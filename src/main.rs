//! signalforge entry point: wire config, restore state, spawn the engine,
//! the market feed, the HTTP edge and the daily reset timer, then wait for
//! shutdown.

use clap::Parser;
use dotenv::dotenv;
use signalforge::bus::SignalBus;
use signalforge::config::EngineConfig;
use signalforge::engine::{Engine, EngineCommand};
use signalforge::feed::MarketFeed;
use signalforge::relay::RelayRegistry;
use signalforge::server::{self, AppState};
use signalforge::snapshot::SnapshotStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Webhook-signal driven dual-FSM trading engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Instrument symbol (overrides SYMBOL)
    #[arg(long)]
    symbol: Option<String>,

    /// HTTP listen port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// State directory (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    let log_level = cli
        .log_level
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    let mut config = EngineConfig::from_env();
    if let Some(symbol) = cli.symbol {
        config.symbol = symbol;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }
    info!(symbol = %config.symbol, port = config.port, "signalforge starting");

    let store = match SnapshotStore::open(&config.data_dir) {
        Ok(store) => store,
        Err(e) => {
            error!(dir = %config.data_dir.display(), error = %e, "Cannot open state directory");
            return ExitCode::FAILURE;
        }
    };
    let engine = Engine::bootstrap(&config, store);

    // One command channel: the engine task is the only owner of trading
    // state, and every event source funnels through it.
    let (engine_tx, engine_rx) = mpsc::unbounded_channel();

    // Signal bus: the webhook publishes, the engine subscribes.
    let mut bus = SignalBus::new();
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    bus.subscribe_all(signal_tx, "engine");
    let bus = Arc::new(bus);
    {
        let engine_tx = engine_tx.clone();
        tokio::spawn(async move {
            while let Some(signal) = signal_rx.recv().await {
                if engine_tx.send(EngineCommand::Signal(signal)).is_err() {
                    break;
                }
            }
        });
    }

    let engine_task = tokio::spawn(engine.run(engine_rx, config.clone()));

    let feed_connected = Arc::new(AtomicBool::new(false));
    tokio::spawn(
        MarketFeed::new(
            config.stream_url(),
            engine_tx.clone(),
            Arc::clone(&feed_connected),
        )
        .run(),
    );

    spawn_daily_reset(engine_tx.clone());

    let state = AppState {
        engine: engine_tx.clone(),
        bus,
        relays: Arc::new(RelayRegistry::new()),
        feed_connected,
        symbol: config.symbol.clone(),
        started_at: Instant::now(),
    };

    let mut exit = ExitCode::SUCCESS;
    tokio::select! {
        res = server::run_server(state, config.port) => {
            if let Err(e) = res {
                error!(error = %e, "HTTP server failed");
                exit = ExitCode::FAILURE;
            }
        }
        _ = shutdown_signal() => {}
    }

    // Stop the engine and let it write its final snapshot.
    let _ = engine_tx.send(EngineCommand::Shutdown);
    let _ = engine_task.await;
    info!("signalforge stopped");
    exit
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    info!("Shutdown signal received, gracefully stopping");
}

/// Fire a daily-stats reset at every UTC midnight.
fn spawn_daily_reset(engine_tx: mpsc::UnboundedSender<EngineCommand>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_utc_midnight()).await;
            info!("UTC midnight: resetting daily session stats");
            if engine_tx.send(EngineCommand::ResetDaily).is_err() {
                break;
            }
        }
    });
}

fn until_next_utc_midnight() -> std::time::Duration {
    let now = chrono::Utc::now();
    let next = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| (dt - now.naive_utc()).num_milliseconds())
        .unwrap_or(24 * 60 * 60 * 1000);
    std::time::Duration::from_millis(next.max(1000) as u64)
}

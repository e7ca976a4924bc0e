//! # AffinityBots Scheduler — Workflow Scheduling Service
//!
//! Runs the workflow scheduling and trigger-dispatch core: schedule
//! registry, firing worker, execution history, and the webhook/integration
//! event gateway.
//!
//! Usage:
//!   affinity                         # Start with defaults (port 8090)
//!   affinity --port 8080             # Custom port
//!   affinity --db-path ./sched.db    # Custom database location

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use affinity_core::AffinityConfig;
use affinity_gateway::AppState;
use affinity_scheduler::{
    EventDispatcher, ExecutionHistory, HttpInvoker, ScheduleQueue, ScheduleRegistry,
    ScheduleWorker, spawn_worker,
};
use affinity_store::WorkflowStore;

#[derive(Parser)]
#[command(
    name = "affinity",
    version,
    about = "📅 AffinityBots Scheduler — workflow schedules, triggers, and dispatch"
)]
struct Cli {
    /// Config file path (default ~/.affinity/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Gateway port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Seconds between due-schedule checks (overrides config)
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "affinity=debug,affinity_scheduler=debug,tower_http=debug"
    } else {
        "affinity=info,affinity_scheduler=info,affinity_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Load config, apply CLI overrides
    let mut config = match &cli.config {
        Some(path) => AffinityConfig::load_from(std::path::Path::new(&expand_path(path)))?,
        None => AffinityConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(db_path) = cli.db_path {
        config.store.db_path = db_path;
    }
    if let Some(tick) = cli.tick_secs {
        config.worker.tick_secs = tick;
    }

    // Open the store
    let db_path = expand_path(&config.store.db_path);
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(WorkflowStore::open(std::path::Path::new(&db_path))?);
    tracing::info!("💾 Store opened at {db_path}");

    // Wire the scheduling core
    let queue = Arc::new(ScheduleQueue::new());
    let registry = Arc::new(ScheduleRegistry::new(store.clone(), queue.clone()));
    let history = Arc::new(ExecutionHistory::new(
        store.clone(),
        config.worker.max_error_len,
    ));
    let invoker = Arc::new(HttpInvoker::new(&config.execution));
    let dispatcher = Arc::new(EventDispatcher::new(
        store.clone(),
        invoker.clone(),
        history.clone(),
    ));

    // The database is the source of truth — rebuild the armed queue from
    // it before the first tick, healing any state the process lost.
    registry.sync_schedules_from_database().await?;

    // Start the firing worker
    let worker = Arc::new(ScheduleWorker::new(
        store.clone(),
        queue.clone(),
        invoker,
        history.clone(),
    ));
    spawn_worker(worker, config.worker.tick_secs);

    // Serve the gateway until shutdown
    let state = AppState {
        gateway_config: config.gateway.clone(),
        store,
        queue,
        registry,
        history,
        dispatcher,
        start_time: std::time::Instant::now(),
    };
    affinity_gateway::server::serve(state).await?;

    Ok(())
}

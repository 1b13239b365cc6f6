//! # LanWake: Wake-on-LAN Server
//!
//! Registers machines and groups, wakes them, verifies they came up and runs
//! scheduled wakes.
//!
//! Usage:
//!   lanwake                          # Serve on 0.0.0.0:8000
//!   lanwake --port 9000 --verbose    # Custom port, debug logs
//!   lanwake --init-config            # Write ~/.lanwake/config.toml and exit

use anyhow::{Context, Result};
use clap::Parser;
use lanwake_core::LanWakeConfig;
use lanwake_db::WakeDb;
use lanwake_gateway::AppState;
use lanwake_scheduler::{SchedulerLoop, spawn_scheduler};
use lanwake_wol::{PingProbe, WolSender};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lanwake",
    version,
    about = "⚡ LanWake: Wake-on-LAN with verification and scheduling"
)]
struct Cli {
    /// Config file (default: ~/.lanwake/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "lanwake=debug,lanwake_monitor=debug,lanwake_scheduler=debug,tower_http=debug"
    } else {
        "lanwake=info,lanwake_db=info,lanwake_wol=info,lanwake_monitor=info,lanwake_scheduler=info,lanwake_gateway=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("⚠️ Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("👋 Shutting down...");
    tx.send(true).ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config_path = cli
        .config
        .as_deref()
        .map(expand_path)
        .unwrap_or_else(LanWakeConfig::default_path);

    if cli.init_config {
        if config_path.exists() {
            println!("⚠️  Config already exists: {}", config_path.display());
        } else {
            LanWakeConfig::default().save_to(&config_path)?;
            println!("✅ Default config written to {}", config_path.display());
        }
        return Ok(());
    }

    let mut config = if config_path.exists() {
        LanWakeConfig::load_from(&config_path)?
    } else {
        tracing::info!("No config at {}, using defaults", config_path.display());
        LanWakeConfig::default()
    };
    config.apply_env_overrides()?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    let db_path = config.database.resolved_path();
    let db = Arc::new(
        WakeDb::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );
    tracing::info!("💾 Database: {}", db_path.display());

    let sender = WolSender::from_config(&config.wol);
    let wol_info = sender.info();
    tracing::info!(
        "📡 WOL method: {} (interface {}, etherwake {})",
        wol_info.method,
        wol_info.interface,
        if wol_info.etherwake_available { "available" } else { "not found" }
    );
    let probe = Arc::new(PingProbe::new(config.monitor.probe_timeout()));
    let scheduler_config = config.scheduler.clone();

    let state = Arc::new(AppState::new(config, db.clone(), Arc::new(sender), probe, wol_info));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(SchedulerLoop::new(
        db.clone(),
        state.waker.clone(),
        db,
        scheduler_config,
    ));
    let scheduler_handle = spawn_scheduler(scheduler, shutdown_rx.clone());

    let mut server_shutdown = shutdown_rx;
    let served = lanwake_gateway::serve(state.clone(), async move {
        server_shutdown.wait_for(|stop| *stop).await.ok();
    });

    let result = tokio::select! {
        result = served => result,
        _ = shutdown_signal(shutdown_tx.clone()) => Ok(()),
    };

    // Stop everything if the server exited on its own
    shutdown_tx.send(true).ok();
    state.monitors.shutdown();
    scheduler_handle.await.ok();
    result
}

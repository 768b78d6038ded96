//! fleetd: the game-server fleet controller daemon.
//!
//! Assembles the controller subsystems in one process:
//! - Fleet store (Redis, or an embedded redb file)
//! - Docker executor
//! - Fleet monitor (the control loop)
//! - REST API
//! - Operator console on stdin
//!
//! # Usage
//!
//! ```text
//! fleetd --config /etc/fleetd/fleetd.toml --port 1000
//! ```

mod config;
mod console;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleet_executor::DockerExecutor;
use fleet_monitor::{FleetMonitor, Provisioner};
use fleet_state::{Fleet, FleetStore, RedisStore, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{FleetdConfig, StoreBackend};
use crate::console::Console;

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleet=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "Game-server fleet controller")]
struct Cli {
    /// Path to the TOML config file. A missing file means defaults.
    #[arg(long, default_value = "fleetd.toml")]
    config: PathBuf,

    /// API listen port (overrides config and MM_WEB_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Control-loop interval in milliseconds.
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Do not read commands from stdin.
    #[arg(long)]
    no_console: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = FleetdConfig::load(&cli.config)?;
    config.apply_env()?;
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    if let Some(tick_ms) = cli.tick_ms {
        config.monitor.tick_ms = tick_ms;
    }
    if cli.no_console {
        config.console.enabled = false;
    }

    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.redis_host, config.store.redis_port).await?;
            run(store, config).await
        }
        StoreBackend::Embedded => {
            if let Some(parent) = config.store.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = StateStore::open(&config.store.path)?;
            info!(path = ?config.store.path, "embedded fleet store opened");
            run(store, config).await
        }
    }
}

async fn run<S: FleetStore>(store: S, config: FleetdConfig) -> anyhow::Result<()> {
    info!("fleet controller starting");

    let fleet = Fleet::new(store).with_namespace(&config.store.namespace);

    // ── Initialize subsystems ──────────────────────────────────

    let mut executor = DockerExecutor::new(&config.docker.socket);
    if let Some(version) = &config.docker.api_version {
        executor = executor.with_api_version(version);
    }
    info!(socket = ?config.docker.socket, "docker executor initialized");

    let mut monitor = FleetMonitor::new(
        fleet.clone(),
        Arc::new(executor),
        config.monitor.clone(),
        Provisioner::new(config.provision_config()),
    );
    let removed = monitor.init().await?;
    if !removed.is_empty() {
        info!(groups = ?removed, "removed per-player server groups");
    }
    let handle = monitor.handle();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let monitor_shutdown = shutdown_rx.clone();
    let monitor_task = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let api_task = if config.api.enabled {
        let router = fleet_api::build_router(fleet.clone(), Some(handle.clone()));
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "API server listening");

        let mut api_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "API server stopped with error");
            }
        }))
    } else {
        None
    };

    let console_task = config
        .console
        .enabled
        .then(|| tokio::spawn(console::run(Console::new(fleet, handle))));

    // ── Wait for Ctrl-C, or the console closing ────────────────

    let console_closed = async {
        match console_task {
            Some(task) => {
                let _ = task.await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
        }
        _ = console_closed => {
            info!("console closed, shutting down");
        }
    }
    let _ = shutdown_tx.send(true);

    let _ = monitor_task.await;
    if let Some(task) = api_task {
        let _ = task.await;
    }

    info!("fleet controller stopped");
    Ok(())
}

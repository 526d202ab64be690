//! datachatd: hosts the datachat connection pool manager.
//!
//! Loads tenant connections from a TOML file, keeps them warm under the
//! manager's health-check and idle-reaper sweeps, and drains every pool on
//! SIGINT / SIGTERM.
//!
//! # Usage
//!
//! ```text
//! datachatd serve --config /etc/datachat/datachatd.toml
//! datachatd check --config /etc/datachat/datachatd.toml
//! ```

mod settings;

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use datachat_pool::{ConnectionConfig, ConnectionManager};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::{LogFormat, LoggingSettings, Settings};

#[derive(Parser)]
#[command(name = "datachatd", about = "Per-tenant data source connection manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open every configured connection and keep the pools running until signalled.
    Serve {
        /// Settings file.
        #[arg(long, default_value = "datachatd.toml")]
        config: PathBuf,
    },
    /// Try every configured connection once, print pool stats as JSON, then exit.
    Check {
        /// Settings file.
        #[arg(long, default_value = "datachatd.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            let settings = Settings::from_file(&config)?;
            init_tracing(&settings.logging)?;
            run_serve(settings).await
        }
        Command::Check { config } => {
            let settings = Settings::from_file(&config)?;
            init_tracing(&settings.logging)?;
            run_check(settings).await
        }
    }
}

fn init_tracing(logging: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&logging.filter))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Acquire and release each connection once. Returns how many were unavailable.
async fn warm(manager: &ConnectionManager, connections: &[ConnectionConfig]) -> usize {
    let mut unavailable = 0;
    for connection in connections {
        match manager.acquire(connection).await {
            Ok(_) => {
                manager
                    .release(&connection.tenant_id, &connection.connection_id)
                    .await;
                info!(key = %connection.key(), kind = %connection.kind, "connection ready");
            }
            Err(e) => {
                unavailable += 1;
                warn!(key = %connection.key(), kind = %connection.kind, error = %e, "connection unavailable");
            }
        }
    }
    unavailable
}

async fn run_serve(settings: Settings) -> anyhow::Result<()> {
    info!(connections = settings.connections.len(), "datachatd starting");

    let manager = ConnectionManager::with_standard_adapters(settings.manager.to_manager_config());
    let unavailable = warm(&manager, &settings.connections).await;
    if unavailable > 0 {
        warn!(unavailable, "some connections failed to open; they will be retried on demand");
    }

    let mut stats_tick = tokio::time::interval(settings.stats_interval());
    stats_tick.tick().await;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = stats_tick.tick() => {
                manager.registry().log_stats().await;
            }
            _ = &mut signal => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let report = manager.shutdown().await;
    info!(closed = report.closed, "datachatd stopped");
    Ok(())
}

async fn run_check(settings: Settings) -> anyhow::Result<()> {
    let manager = ConnectionManager::with_standard_adapters(settings.manager.to_manager_config());
    let unavailable = warm(&manager, &settings.connections).await;

    let summary = serde_json::json!({
        "stats": manager.stats().await,
        "entries": manager.entries().await,
        "unavailable": unavailable,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    manager.shutdown().await;
    if unavailable > 0 {
        bail!(
            "{unavailable} of {} connections unavailable",
            settings.connections.len()
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

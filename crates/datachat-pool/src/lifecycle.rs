//! Lifecycle controller: owns the background sweeps and drains the
//! registry on shutdown.
//!
//! Signal handling belongs to the hosting process: it reacts to SIGTERM /
//! Ctrl-C by calling [`LifecycleController::shutdown`].

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ManagerConfig;
use crate::health::HealthCheckScheduler;
use crate::reaper::IdleReaper;
use crate::registry::ConnectionRegistry;

/// Result of a [`LifecycleController::shutdown`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Entries closed by this call.
    pub closed: usize,
}

/// Starts the health-check and idle-reaper tasks and tears everything down once.
pub struct LifecycleController {
    registry: ConnectionRegistry,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shut_down: AtomicBool,
}

impl LifecycleController {
    /// Spawn both sweeps on the current tokio runtime.
    pub fn start(registry: ConnectionRegistry, config: &ManagerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let health = HealthCheckScheduler::new(
            registry.clone(),
            config.health_check_interval,
            config.ping_timeout,
        );
        let reaper = IdleReaper::new(
            registry.clone(),
            config.idle_reap_interval,
            config.idle_threshold,
        );

        let health_shutdown = shutdown_rx.clone();
        let health_handle = tokio::spawn(async move {
            health.run(health_shutdown).await;
        });

        let reaper_shutdown = shutdown_rx;
        let reaper_handle = tokio::spawn(async move {
            reaper.run(reaper_shutdown).await;
        });

        info!("connection lifecycle started");

        Self {
            registry,
            shutdown_tx,
            tasks: Mutex::new(vec![
                ("health-check", health_handle),
                ("idle-reaper", reaper_handle),
            ]),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop both sweeps, then evict and close every entry.
    ///
    /// Only the first call does any work; later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!("connection lifecycle shutting down");

        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "background sweep ended abnormally");
            }
        }

        let closed = self.registry.close_all().await;
        info!(closed, "connection lifecycle stopped");
        ShutdownReport { closed }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

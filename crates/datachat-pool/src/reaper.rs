//! Idle reaper: closes entries nobody has used for a while.
//!
//! An entry is reaped only when it has no active queries and its last use is
//! older than the idle threshold. Busy entries are never touched, however
//! old they are.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;

/// Runs the idle sweep on a fixed interval.
#[derive(Clone, Debug)]
pub struct IdleReaper {
    registry: ConnectionRegistry,
    interval: Duration,
    idle_threshold: Duration,
}

impl IdleReaper {
    pub fn new(registry: ConnectionRegistry, interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            registry,
            interval,
            idle_threshold,
        }
    }

    /// Reap idle entries once. Returns the number closed.
    pub async fn sweep(&self) -> usize {
        let reaped = self
            .registry
            .take_idle(Instant::now(), self.idle_threshold)
            .await;
        let count = reaped.len();
        for entry in reaped {
            self.registry.close_entry(entry, "idle").await;
        }
        if count > 0 {
            info!(
                reaped = count,
                idle_threshold_secs = self.idle_threshold.as_secs(),
                "reaped idle connections"
            );
        }
        count
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            idle_threshold_secs = self.idle_threshold.as_secs(),
            "idle reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    debug!("idle reaper shutting down");
                    break;
                }
            }
        }
    }
}

//! Health-check scheduler: periodic ping sweep over every entry.
//!
//! A failed or timed-out ping marks the entry Unhealthy and evicts it on the
//! spot, so the next acquisition for that key opens a fresh connection. Each
//! entry is checked independently; one bad backend never stops the sweep,
//! not even one whose adapter panics.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::adapter;
use crate::entry::Health;
use crate::error::{AdapterError, PoolError};
use crate::registry::{ConnectionRegistry, PingTarget};

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HealthSweep {
    /// Entries pinged.
    pub checked: usize,
    /// Entries that answered.
    pub healthy: usize,
    /// Entries evicted after a failed ping.
    pub evicted: usize,
}

/// Runs the health sweep on a fixed interval.
#[derive(Clone, Debug)]
pub struct HealthCheckScheduler {
    registry: ConnectionRegistry,
    interval: Duration,
    ping_timeout: Duration,
}

impl HealthCheckScheduler {
    pub fn new(registry: ConnectionRegistry, interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            ping_timeout,
        }
    }

    /// Ping every entry once.
    pub async fn sweep(&self) -> HealthSweep {
        let targets = self.registry.ping_targets().await;
        let mut report = HealthSweep {
            checked: targets.len(),
            ..HealthSweep::default()
        };

        for target in targets {
            match self.ping(&target).await {
                Ok(()) => {
                    self.registry
                        .set_health(&target.key, target.entry_id, Health::Healthy)
                        .await;
                    report.healthy += 1;
                }
                Err(source) => {
                    self.registry
                        .set_health(&target.key, target.entry_id, Health::Unhealthy)
                        .await;
                    let err = PoolError::HealthCheckFailure {
                        key: target.key.clone(),
                        source,
                    };
                    warn!(entry_id = target.entry_id, error = %err, "evicting unhealthy connection");
                    if self
                        .registry
                        .evict_entry(&target.key, target.entry_id, "health check failed")
                        .await
                    {
                        report.evicted += 1;
                    }
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                healthy = report.healthy,
                evicted = report.evicted,
                "health check sweep complete"
            );
        }
        report
    }

    async fn ping(&self, target: &PingTarget) -> Result<(), AdapterError> {
        let backend = Arc::clone(&target.adapter);
        let handle = target.handle.clone();
        adapter::call_isolated(self.ping_timeout, async move { backend.ping(&handle).await }).await
    }

    /// Run the sweep loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            ping_timeout_ms = self.ping_timeout.as_millis() as u64,
            "health check scheduler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    debug!("health check scheduler shutting down");
                    break;
                }
            }
        }
    }
}

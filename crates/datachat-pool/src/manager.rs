//! The facade the rest of the service talks to.
//!
//! Owns a [`ConnectionRegistry`] and the [`LifecycleController`] driving its
//! sweeps. Query code calls `acquire` / `release`; admin routes call
//! `stats` / `entries`; the process calls `shutdown` once on exit.

use crate::adapter::{AdapterSet, ConnectionHandle};
use crate::config::{ConnectionConfig, EntryKey, ManagerConfig};
use crate::error::PoolError;
use crate::health::{HealthCheckScheduler, HealthSweep};
use crate::lifecycle::{LifecycleController, ShutdownReport};
use crate::reaper::IdleReaper;
use crate::registry::{ConnectionRegistry, Lease};
use crate::stats::{EntryInfo, PoolStats};

pub struct ConnectionManager {
    config: ManagerConfig,
    registry: ConnectionRegistry,
    lifecycle: LifecycleController,
}

impl ConnectionManager {
    /// Build the registry and start the background sweeps.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ManagerConfig, adapters: AdapterSet) -> Self {
        let registry = ConnectionRegistry::with_close_timeout(adapters, config.close_timeout);
        let lifecycle = LifecycleController::start(registry.clone(), &config);
        tracing::info!(
            health_check_interval_secs = config.health_check_interval.as_secs(),
            idle_reap_interval_secs = config.idle_reap_interval.as_secs(),
            idle_threshold_secs = config.idle_threshold.as_secs(),
            "connection manager started"
        );
        Self {
            config,
            registry,
            lifecycle,
        }
    }

    /// Start with the built-in Postgres, MySQL, MongoDB and file adapters.
    pub fn with_standard_adapters(config: ManagerConfig) -> Self {
        Self::start(config, AdapterSet::standard())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn acquire(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, PoolError> {
        self.registry.acquire(config).await
    }

    /// Release by key. See [`ConnectionRegistry::release`] for how this
    /// behaves when the entry was replaced in the meantime.
    pub async fn release(&self, tenant_id: &str, connection_id: &str) {
        self.registry.release(tenant_id, connection_id).await;
    }

    pub async fn acquire_lease(&self, config: &ConnectionConfig) -> Result<Lease, PoolError> {
        self.registry.acquire_lease(config).await
    }

    /// Release exactly the entry generation `lease` came from.
    pub async fn release_lease(&self, lease: &Lease) -> bool {
        self.registry.release_lease(lease).await
    }

    pub async fn stats(&self) -> PoolStats {
        self.registry.stats().await
    }

    pub async fn entries(&self) -> Vec<EntryInfo> {
        self.registry.entries().await
    }

    /// Close one connection, e.g. after its configuration was edited or deleted.
    pub async fn close_connection(&self, tenant_id: &str, connection_id: &str) -> bool {
        self.registry
            .evict_and_close(&EntryKey::new(tenant_id, connection_id))
            .await
    }

    /// Close every connection of a tenant, e.g. when the tenant is removed.
    pub async fn close_tenant(&self, tenant_id: &str) -> usize {
        self.registry.close_tenant(tenant_id).await
    }

    /// Run a health sweep now instead of waiting for the next tick.
    pub async fn check_health(&self) -> HealthSweep {
        HealthCheckScheduler::new(
            self.registry.clone(),
            self.config.health_check_interval,
            self.config.ping_timeout,
        )
        .sweep()
        .await
    }

    /// Run an idle sweep now instead of waiting for the next tick.
    pub async fn reap_idle(&self) -> usize {
        IdleReaper::new(
            self.registry.clone(),
            self.config.idle_reap_interval,
            self.config.idle_threshold,
        )
        .sweep()
        .await
    }

    /// Stop the sweeps and close everything. Idempotent.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.lifecycle.shutdown().await
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifecycle.is_shut_down()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::adapter::FileAdapter;
    use crate::config::BackendKind;

    fn manager_with(config: ManagerConfig) -> ConnectionManager {
        ConnectionManager::start(
            config,
            AdapterSet::new().with(BackendKind::File, Arc::new(FileAdapter)),
        )
    }

    fn manager() -> ConnectionManager {
        manager_with(ManagerConfig::default())
    }

    fn csv(tenant: &str, connection: &str) -> ConnectionConfig {
        ConnectionConfig::new(tenant, connection, BackendKind::File, &format!("/srv/{connection}.csv"))
    }

    #[tokio::test]
    async fn acquire_release_roundtrip() {
        let manager = manager();
        let handle = manager.acquire(&csv("t1", "leads")).await.unwrap();
        assert_eq!(handle.as_file().unwrap().path().to_str(), Some("/srv/leads.csv"));
        assert_eq!(manager.stats().await.active_queries, 1);

        manager.release("t1", "leads").await;
        let infos = manager.entries().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].active_queries, 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn close_connection_and_tenant() {
        let manager = manager();
        manager.acquire(&csv("t1", "a")).await.unwrap();
        manager.acquire(&csv("t1", "b")).await.unwrap();
        manager.acquire(&csv("t2", "a")).await.unwrap();

        assert!(manager.close_connection("t2", "a").await);
        assert!(!manager.close_connection("t2", "a").await);
        assert_eq!(manager.close_tenant("t1").await, 2);
        assert_eq!(manager.stats().await.total, 0);

        assert_eq!(manager.shutdown().await.closed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_sweeps_use_configured_thresholds() {
        // Keep the background sweeps out of the way.
        let manager = manager_with(ManagerConfig {
            health_check_interval: Duration::from_secs(24 * 3600),
            idle_reap_interval: Duration::from_secs(24 * 3600),
            ..ManagerConfig::default()
        });
        manager.acquire(&csv("t1", "leads")).await.unwrap();
        manager.release("t1", "leads").await;

        let sweep = manager.check_health().await;
        assert_eq!(sweep.checked, 1);
        assert_eq!(sweep.healthy, 1);

        tokio::time::advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(manager.reap_idle().await, 0);
        tokio::time::advance(Duration::from_secs(21 * 60)).await;
        assert_eq!(manager.reap_idle().await, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn lease_survives_eviction_and_replacement() {
        let manager = manager();
        let old = manager.acquire_lease(&csv("t1", "leads")).await.unwrap();
        assert!(manager.close_connection("t1", "leads").await);
        let new = manager.acquire_lease(&csv("t1", "leads")).await.unwrap();

        assert!(!manager.release_lease(&old).await);
        assert_eq!(manager.stats().await.active_queries, 1);
        assert!(manager.release_lease(&new).await);
        assert_eq!(manager.stats().await.active_queries, 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_twice() {
        let manager = manager();
        manager.acquire(&csv("t1", "leads")).await.unwrap();

        assert_eq!(manager.shutdown().await.closed, 1);
        assert!(manager.is_shut_down());
        assert_eq!(manager.shutdown().await.closed, 0);
        assert!(matches!(
            manager.acquire(&csv("t1", "leads")).await,
            Err(PoolError::ShuttingDown)
        ));
    }
}

//! Registry entries: one live backend handle plus its usage metadata.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::adapter::{BackendAdapter, ConnectionHandle};
use crate::config::ConnectionConfig;

/// Health flag set by the health-check sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Unhealthy,
}

/// A tracked connection. Owns its handle exclusively; the registry hands out
/// clones of the handle but never shares an entry between keys.
pub struct PooledConnectionEntry {
    /// Registry-unique generation number.
    pub(crate) id: u64,
    pub(crate) config: ConnectionConfig,
    pub(crate) handle: ConnectionHandle,
    /// Adapter that opened `handle`; ping and close go through it.
    pub(crate) adapter: Arc<dyn BackendAdapter>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    pub(crate) active_queries: u32,
    pub(crate) health: Health,
}

impl PooledConnectionEntry {
    pub(crate) fn new(
        id: u64,
        config: ConnectionConfig,
        handle: ConnectionHandle,
        adapter: Arc<dyn BackendAdapter>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            config,
            handle,
            adapter,
            created_at: now,
            last_used_at: now,
            active_queries: 0,
            health: Health::Healthy,
        }
    }

    /// Record an acquisition.
    pub(crate) fn checkout(&mut self, now: Instant) -> ConnectionHandle {
        self.active_queries = self.active_queries.saturating_add(1);
        self.last_used_at = now;
        self.handle.clone()
    }

    /// Record a release. Returns `false` when there was no outstanding acquisition.
    pub(crate) fn checkin(&mut self, now: Instant) -> bool {
        if self.active_queries == 0 {
            return false;
        }
        self.active_queries -= 1;
        self.last_used_at = now;
        true
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }

    /// No active queries and unused for strictly longer than `threshold`.
    pub(crate) fn is_idle(&self, now: Instant, threshold: Duration) -> bool {
        self.active_queries == 0 && now.saturating_duration_since(self.last_used_at) > threshold
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn active_queries(&self) -> u32 {
        self.active_queries
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }
}

impl std::fmt::Debug for PooledConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnectionEntry")
            .field("id", &self.id)
            .field("key", &self.config.key())
            .field("kind", &self.config.kind)
            .field("active_queries", &self.active_queries)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

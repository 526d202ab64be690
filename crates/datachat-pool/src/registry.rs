//! Connection registry: the single source of truth for live entries.
//!
//! Entries are keyed by `(tenant_id, connection_id)`. At most one entry
//! exists per key; concurrent first acquisitions of a key are serialized by
//! a per-key creation guard so they converge on one backend connection.
//!
//! # Acquisition
//!
//! ```text
//! acquire(config)
//!   → Healthy entry for key → checkout (active_queries += 1) → handle
//!   → otherwise lock creation guard for key
//!     → re-check (another caller may have just created it)
//!     → spawn creation task (owns the guard)
//!       → close stale Unhealthy entry
//!       → adapter.open(config) within connection_timeout
//!       → insert entry (active_queries = 0)
//!     → checkout the new entry → handle
//! ```
//!
//! The entries lock is never held across backend I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::adapter::{self, AdapterSet, BackendAdapter, ConnectionHandle};
use crate::config::{ConnectionConfig, EntryKey};
use crate::entry::{Health, PooledConnectionEntry};
use crate::error::{AdapterError, PoolError};
use crate::stats::{EntryInfo, PoolStats};

/// Default bound on closing one backend handle.
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// What a health sweep needs to ping one entry outside the registry lock.
pub(crate) struct PingTarget {
    pub(crate) key: EntryKey,
    pub(crate) entry_id: u64,
    pub(crate) adapter: Arc<dyn BackendAdapter>,
    pub(crate) handle: ConnectionHandle,
}

/// One acquisition, tied to the entry generation that served it.
///
/// Returning it with [`ConnectionRegistry::release_lease`] only ever
/// decrements that generation, never a replacement opened under the same key.
#[derive(Clone, Debug)]
pub struct Lease {
    pub key: EntryKey,
    pub entry_id: u64,
    pub handle: ConnectionHandle,
}

struct RegistryInner {
    entries: Mutex<HashMap<EntryKey, PooledConnectionEntry>>,
    /// Per-key creation guards. Holding a key's guard is the right to create its entry.
    creation_guards: Mutex<HashMap<EntryKey, Arc<Mutex<()>>>>,
    adapters: AdapterSet,
    next_id: AtomicU64,
    /// When true, `acquire()` is rejected and in-flight creations discard their handle.
    closing: AtomicBool,
    close_timeout: Duration,
}

/// Keyed store of pooled connection entries. Cloning shares the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry resolving adapters from `adapters`.
    pub fn new(adapters: AdapterSet) -> Self {
        Self::with_close_timeout(adapters, DEFAULT_CLOSE_TIMEOUT)
    }

    pub fn with_close_timeout(adapters: AdapterSet, close_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: Mutex::new(HashMap::new()),
                creation_guards: Mutex::new(HashMap::new()),
                adapters,
                next_id: AtomicU64::new(1),
                closing: AtomicBool::new(false),
                close_timeout,
            }),
        }
    }

    /// Check if the registry has been closed by [`close_all`](Self::close_all).
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Get a handle for `config`, creating the backend connection if needed.
    ///
    /// Increments the entry's `active_queries`; pair every successful call
    /// with [`release`](Self::release). Creation failures are not cached,
    /// the next call retries.
    pub async fn acquire(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, PoolError> {
        self.acquire_lease(config).await.map(|lease| lease.handle)
    }

    /// Like [`acquire`](Self::acquire), but returns a [`Lease`] to hand back
    /// through [`release_lease`](Self::release_lease).
    pub async fn acquire_lease(&self, config: &ConnectionConfig) -> Result<Lease, PoolError> {
        if self.is_closing() {
            return Err(PoolError::ShuttingDown);
        }
        config.validate()?;
        let key = config.key();

        if let Some(lease) = self.checkout(&key, None).await {
            tracing::debug!(%key, kind = %config.kind, "reused pooled connection");
            return Ok(lease);
        }

        let guard = self.creation_guard(&key).await.lock_owned().await;

        // Another caller may have finished creating while we waited.
        if let Some(lease) = self.checkout(&key, None).await {
            tracing::debug!(%key, kind = %config.kind, "reused connection created concurrently");
            return Ok(lease);
        }

        // The creation task owns the guard, so abandoning this call neither
        // cancels the open nor lets a second creation start for the key.
        let registry = self.clone();
        let owned_config = config.clone();
        let creation = tokio::spawn(async move {
            let _guard = guard;
            registry.create_entry(&owned_config).await
        });

        let created = match creation.await {
            Ok(result) => result,
            Err(e) => Err(PoolError::BackendUnavailable {
                key: key.clone(),
                kind: config.kind,
                source: AdapterError::Backend(format!("connection task failed: {e}")),
            }),
        };
        let entry_id = match created {
            Ok(id) => id,
            Err(err) => {
                // The creation task has dropped the guard by now.
                self.forget_guard(&key).await;
                return Err(err);
            }
        };

        match self.checkout(&key, Some(entry_id)).await {
            Some(lease) => Ok(lease),
            None => Err(PoolError::BackendUnavailable {
                key,
                kind: config.kind,
                source: AdapterError::Evicted,
            }),
        }
    }

    /// Release one acquisition of `(tenant_id, connection_id)`.
    ///
    /// A release for an unknown key, or for an entry with no active
    /// queries, is a no-op: the entry may have been evicted concurrently.
    ///
    /// Matching is by key alone. If the entry a caller acquired was evicted
    /// and replaced, this decrements the replacement. Callers that can
    /// outlive an eviction should use [`acquire_lease`](Self::acquire_lease)
    /// and [`release_lease`](Self::release_lease) instead.
    pub async fn release(&self, tenant_id: &str, connection_id: &str) {
        let key = EntryKey::new(tenant_id, connection_id);
        let mut entries = self.inner.entries.lock().await;
        match entries.get_mut(&key) {
            Some(entry) => {
                if entry.checkin(Instant::now()) {
                    tracing::debug!(%key, active_queries = entry.active_queries, "released connection");
                } else {
                    tracing::debug!(%key, "release without outstanding acquisition ignored");
                }
            }
            None => tracing::debug!(%key, "release for untracked connection ignored"),
        }
    }

    /// Release `lease`. Returns `false` if its entry generation is gone or
    /// has no outstanding acquisition.
    pub async fn release_lease(&self, lease: &Lease) -> bool {
        let mut entries = self.inner.entries.lock().await;
        match entries.get_mut(&lease.key).filter(|e| e.id == lease.entry_id) {
            Some(entry) => {
                let released = entry.checkin(Instant::now());
                tracing::debug!(
                    key = %lease.key,
                    entry_id = lease.entry_id,
                    active_queries = entry.active_queries,
                    released,
                    "released lease"
                );
                released
            }
            None => {
                tracing::debug!(key = %lease.key, entry_id = lease.entry_id, "release for replaced connection ignored");
                false
            }
        }
    }

    /// Aggregate counts across every entry.
    pub async fn stats(&self) -> PoolStats {
        let entries = self.inner.entries.lock().await;
        PoolStats::from_entries(entries.values())
    }

    /// Per-entry snapshot, sorted by key.
    pub async fn entries(&self) -> Vec<EntryInfo> {
        let now = Instant::now();
        let entries = self.inner.entries.lock().await;
        let mut infos: Vec<_> = entries
            .values()
            .map(|entry| EntryInfo::from_entry(entry, now))
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Remove the entry for `key` and close its handle. Idempotent.
    ///
    /// Returns `true` if an entry was removed.
    pub async fn evict_and_close(&self, key: &EntryKey) -> bool {
        let removed = self.inner.entries.lock().await.remove(key);
        match removed {
            Some(entry) => {
                self.close_entry(entry, "evicted").await;
                true
            }
            None => false,
        }
    }

    /// Evict and close every entry belonging to `tenant_id`.
    pub async fn close_tenant(&self, tenant_id: &str) -> usize {
        let removed: Vec<_> = {
            let mut entries = self.inner.entries.lock().await;
            let keys: Vec<_> = entries
                .keys()
                .filter(|key| key.tenant_id == tenant_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| entries.remove(&key))
                .collect()
        };
        let count = removed.len();
        for entry in removed {
            self.close_entry(entry, "tenant closed").await;
        }
        if count > 0 {
            tracing::info!(tenant = %tenant_id, closed = count, "closed tenant connections");
        }
        count
    }

    /// Stop accepting acquisitions, then evict and close every entry.
    ///
    /// Returns the number of entries closed.
    pub async fn close_all(&self) -> usize {
        self.inner.closing.store(true, Ordering::Release);
        let drained: Vec<_> = {
            let mut entries = self.inner.entries.lock().await;
            entries.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            self.close_entry(entry, "shutdown").await;
        }
        self.inner.creation_guards.lock().await.clear();
        tracing::info!(closed = count, "closed all pooled connections");
        count
    }

    /// Log aggregate statistics at `info` level.
    pub async fn log_stats(&self) {
        let stats = self.stats().await;
        tracing::info!(
            total = stats.total,
            healthy = stats.healthy,
            active_queries = stats.active_queries,
            tenants = stats.by_tenant.len(),
            by_kind = ?stats.by_kind,
            "connection pool statistics"
        );
    }

    // ── Sweep support ───────────────────────────────────────────────

    /// Everything the health sweep needs to ping each entry without holding the lock.
    pub(crate) async fn ping_targets(&self) -> Vec<PingTarget> {
        let entries = self.inner.entries.lock().await;
        entries
            .iter()
            .map(|(key, entry)| PingTarget {
                key: key.clone(),
                entry_id: entry.id,
                adapter: Arc::clone(&entry.adapter),
                handle: entry.handle.clone(),
            })
            .collect()
    }

    /// Set the health flag of entry `entry_id` under `key`, if it is still tracked.
    pub(crate) async fn set_health(&self, key: &EntryKey, entry_id: u64, health: Health) {
        let mut entries = self.inner.entries.lock().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.id == entry_id) {
            entry.health = health;
        }
    }

    /// Evict entry `entry_id` under `key`. A newer entry for the same key is left alone.
    pub(crate) async fn evict_entry(&self, key: &EntryKey, entry_id: u64, reason: &str) -> bool {
        let removed = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get(key) {
                Some(entry) if entry.id == entry_id => entries.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                self.close_entry(entry, reason).await;
                true
            }
            None => false,
        }
    }

    /// Remove every idle entry (see [`PooledConnectionEntry::is_idle`]) in one
    /// locked pass and return them for closing.
    pub(crate) async fn take_idle(&self, now: Instant, threshold: Duration) -> Vec<PooledConnectionEntry> {
        let mut entries = self.inner.entries.lock().await;
        let idle: Vec<_> = entries
            .iter()
            .filter(|(_, entry)| entry.is_idle(now, threshold))
            .map(|(key, _)| key.clone())
            .collect();
        idle.into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }

    /// Close a removed entry's handle, best effort, and drop its creation
    /// guard if nobody is waiting on it.
    pub(crate) async fn close_entry(&self, entry: PooledConnectionEntry, reason: &str) {
        let key = entry.config.key();
        let backend = Arc::clone(&entry.adapter);
        let handle = entry.handle.clone();
        let result = adapter::call_isolated(self.inner.close_timeout, async move {
            backend.close(&handle).await
        })
        .await;
        match result {
            Ok(()) => tracing::info!(
                %key,
                kind = %entry.config.kind,
                entry_id = entry.id,
                reason,
                "closed pooled connection"
            ),
            Err(source) => {
                let err = PoolError::CloseFailure {
                    key: key.clone(),
                    source,
                };
                tracing::warn!(entry_id = entry.id, reason, error = %err, "close failed, entry dropped");
            }
        }
        self.forget_guard(&key).await;
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Checkout the Healthy entry under `key` (optionally only generation `entry_id`).
    async fn checkout(&self, key: &EntryKey, entry_id: Option<u64>) -> Option<Lease> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.get_mut(key)?;
        if !entry.is_healthy() || entry_id.is_some_and(|id| id != entry.id) {
            return None;
        }
        Some(Lease {
            key: key.clone(),
            entry_id: entry.id,
            handle: entry.checkout(Instant::now()),
        })
    }

    async fn creation_guard(&self, key: &EntryKey) -> Arc<Mutex<()>> {
        let mut guards = self.inner.creation_guards.lock().await;
        Arc::clone(guards.entry(key.clone()).or_default())
    }

    #[cfg(test)]
    pub(crate) async fn guard_count(&self) -> usize {
        self.inner.creation_guards.lock().await.len()
    }

    /// Drop the creation guard for `key` unless a caller is holding or waiting on it.
    async fn forget_guard(&self, key: &EntryKey) {
        let mut guards = self.inner.creation_guards.lock().await;
        if guards.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            guards.remove(key);
        }
    }

    /// Open a fresh entry for `config`. Caller must hold the key's creation guard.
    async fn create_entry(&self, config: &ConnectionConfig) -> Result<u64, PoolError> {
        let key = config.key();

        let stale = {
            let mut entries = self.inner.entries.lock().await;
            match entries.get(&key) {
                Some(entry) if !entry.is_healthy() => entries.remove(&key),
                _ => None,
            }
        };
        if let Some(stale) = stale {
            self.close_entry(stale, "replaced unhealthy entry").await;
        }

        let adapter = self
            .inner
            .adapters
            .resolve(config.kind)
            .ok_or(PoolError::NoAdapter(config.kind))?;

        let timeout = config.connection_timeout();
        let opened = match tokio::time::timeout(timeout, adapter.open(config)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(timeout)),
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(source) => {
                let err = PoolError::BackendUnavailable {
                    key,
                    kind: config.kind,
                    source,
                };
                tracing::warn!(error = %err, "failed to open backend connection");
                return Err(err);
            }
        };

        let mut entries = self.inner.entries.lock().await;
        if self.is_closing() {
            drop(entries);
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let orphan = PooledConnectionEntry::new(id, config.clone(), handle, adapter, Instant::now());
            self.close_entry(orphan, "opened during shutdown").await;
            return Err(PoolError::ShuttingDown);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        entries.insert(
            key.clone(),
            PooledConnectionEntry::new(id, config.clone(), handle, adapter, Instant::now()),
        );
        tracing::info!(
            %key,
            kind = %config.kind,
            entry_id = id,
            max_connections = config.max_connections,
            "opened backend connection"
        );
        Ok(id)
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("adapters", &self.inner.adapters)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

//! Registry snapshots for the administration routes.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::{BackendKind, EntryKey};
use crate::entry::{Health, PooledConnectionEntry};

/// Aggregate counts across every tracked entry.
///
/// A point-in-time snapshot; not consistent with mutations racing the call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Tracked entries.
    pub total: usize,
    /// Entries per backend kind.
    pub by_kind: BTreeMap<BackendKind, usize>,
    /// Entries per tenant.
    pub by_tenant: BTreeMap<String, usize>,
    /// Sum of outstanding acquisitions across entries.
    pub active_queries: u64,
    /// Entries currently flagged healthy.
    pub healthy: usize,
}

impl PoolStats {
    pub(crate) fn from_entries<'a>(
        entries: impl IntoIterator<Item = &'a PooledConnectionEntry>,
    ) -> Self {
        entries.into_iter().fold(Self::default(), |mut stats, entry| {
            stats.total += 1;
            *stats.by_kind.entry(entry.config.kind).or_insert(0) += 1;
            *stats
                .by_tenant
                .entry(entry.config.tenant_id.clone())
                .or_insert(0) += 1;
            stats.active_queries += u64::from(entry.active_queries);
            if entry.is_healthy() {
                stats.healthy += 1;
            }
            stats
        })
    }
}

/// Per-entry view, without the handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub key: EntryKey,
    pub kind: BackendKind,
    pub entry_id: u64,
    pub health: Health,
    pub active_queries: u32,
    /// Seconds since the entry was created.
    pub age_secs: u64,
    /// Seconds since the entry was last acquired or released.
    pub idle_secs: u64,
}

impl EntryInfo {
    pub(crate) fn from_entry(entry: &PooledConnectionEntry, now: Instant) -> Self {
        Self {
            key: entry.config.key(),
            kind: entry.config.kind,
            entry_id: entry.id,
            health: entry.health,
            active_queries: entry.active_queries,
            age_secs: now.saturating_duration_since(entry.created_at).as_secs(),
            idle_secs: now.saturating_duration_since(entry.last_used_at).as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::adapter::{ConnectionHandle, FileAdapter, FileHandle};
    use crate::config::ConnectionConfig;

    fn entry(id: u64, tenant: &str, kind: BackendKind, active: u32, health: Health) -> PooledConnectionEntry {
        let config = ConnectionConfig::new(tenant, &format!("c{id}"), kind, "/tmp/x");
        let mut entry = PooledConnectionEntry::new(
            id,
            config,
            ConnectionHandle::File(FileHandle::new("/tmp/x")),
            Arc::new(FileAdapter),
            Instant::now(),
        );
        entry.active_queries = active;
        entry.health = health;
        entry
    }

    #[test]
    fn empty_stats() {
        let stats = PoolStats::from_entries(std::iter::empty());
        assert_eq!(stats, PoolStats::default());
    }

    #[tokio::test]
    async fn stats_aggregate_by_kind_and_tenant() {
        let entries = [
            entry(1, "acme", BackendKind::Postgres, 2, Health::Healthy),
            entry(2, "acme", BackendKind::MongoDb, 0, Health::Unhealthy),
            entry(3, "globex", BackendKind::Postgres, 1, Health::Healthy),
        ];
        let stats = PoolStats::from_entries(entries.iter());

        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_kind.get(&BackendKind::Postgres), Some(&2));
        assert_eq!(stats.by_kind.get(&BackendKind::MongoDb), Some(&1));
        assert_eq!(stats.by_kind.get(&BackendKind::MySql), None);
        assert_eq!(stats.by_tenant.get("acme"), Some(&2));
        assert_eq!(stats.by_tenant.get("globex"), Some(&1));
        assert_eq!(stats.active_queries, 3);
        assert_eq!(stats.healthy, 2);
    }

    #[tokio::test]
    async fn stats_serialize_with_lowercase_kinds() {
        let entries = [entry(1, "acme", BackendKind::MySql, 0, Health::Healthy)];
        let json = serde_json::to_value(PoolStats::from_entries(entries.iter())).unwrap();
        assert_eq!(json["by_kind"]["mysql"], 1);
        assert_eq!(json["by_tenant"]["acme"], 1);
        assert_eq!(json["healthy"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_info_reports_age_and_idle_time() {
        let mut e = entry(9, "acme", BackendKind::File, 0, Health::Healthy);
        tokio::time::advance(Duration::from_secs(90)).await;
        e.checkout(Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;

        let info = EntryInfo::from_entry(&e, Instant::now());
        assert_eq!(info.key, EntryKey::new("acme", "c9"));
        assert_eq!(info.entry_id, 9);
        assert_eq!(info.active_queries, 1);
        assert_eq!(info.age_secs, 120);
        assert_eq!(info.idle_secs, 30);
    }
}

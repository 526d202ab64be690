//! Connection and manager configuration.
//!
//! [`ConnectionConfig`] is supplied by the caller on every acquisition and is
//! never persisted here. [`ManagerConfig`] holds the sweep cadence and
//! timeouts for one manager instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Backend kind of a customer data source.
///
/// Selects the [`BackendAdapter`](crate::adapter::BackendAdapter) that opens,
/// pings, and closes the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// PostgreSQL connection pool.
    Postgres,
    /// MySQL connection pool.
    MySql,
    /// MongoDB client.
    MongoDb,
    /// Local file (CSV, spreadsheet) handle.
    File,
}

impl BackendKind {
    /// Every kind, in declaration order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Postgres,
        BackendKind::MySql,
        BackendKind::MongoDb,
        BackendKind::File,
    ];
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::MySql => write!(f, "mysql"),
            BackendKind::MongoDb => write!(f, "mongodb"),
            BackendKind::File => write!(f, "file"),
        }
    }
}

/// Identity of a registry entry: at most one live entry per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntryKey {
    pub tenant_id: String,
    pub connection_id: String,
}

impl EntryKey {
    pub fn new(tenant_id: &str, connection_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            connection_id: connection_id.to_string(),
        }
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.connection_id)
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

/// A tenant's connection definition, as stored by the administration layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub tenant_id: String,
    pub connection_id: String,
    pub kind: BackendKind,
    /// Connection URI, or a filesystem path for [`BackendKind::File`].
    pub uri: String,
    /// Upper bound on backend-side pooled connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Bound on connection establishment (default: 5000ms).
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

impl ConnectionConfig {
    /// Create a config with default pool bounds.
    pub fn new(tenant_id: &str, connection_id: &str, kind: BackendKind, uri: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            connection_id: connection_id.to_string(),
            kind,
            uri: uri.to_string(),
            max_connections: default_max_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }

    /// Builder method: set the backend pool bound.
    pub fn with_max_connections(self, max_connections: u32) -> Self {
        Self {
            max_connections,
            ..self
        }
    }

    /// Builder method: set the connection timeout.
    pub fn with_connection_timeout(self, timeout: Duration) -> Self {
        Self {
            connection_timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ..self
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(&self.tenant_id, &self.connection_id)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Reject configs no adapter could open.
    pub fn validate(&self) -> Result<(), PoolError> {
        let reason = if self.tenant_id.trim().is_empty() {
            "tenant_id is empty"
        } else if self.connection_id.trim().is_empty() {
            "connection_id is empty"
        } else if self.uri.trim().is_empty() {
            "uri is empty"
        } else if self.max_connections == 0 {
            "max_connections must be at least 1"
        } else if self.connection_timeout_ms == 0 {
            "connection_timeout_ms must be at least 1"
        } else {
            return Ok(());
        };
        Err(PoolError::InvalidConfig {
            key: self.key(),
            reason: reason.to_string(),
        })
    }
}

/// Sweep cadence and timeouts for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Interval between health-check sweeps (default: 5 min).
    pub health_check_interval: Duration,
    /// Interval between idle-reaper sweeps (default: 10 min).
    pub idle_reap_interval: Duration,
    /// Minimum idle time before an entry with no active queries is reaped (default: 30 min).
    pub idle_threshold: Duration,
    /// Bound on a single health-check ping (default: 5s).
    pub ping_timeout: Duration,
    /// Bound on closing a single backend handle (default: 10s).
    pub close_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(5 * 60),
            idle_reap_interval: Duration::from_secs(10 * 60),
            idle_threshold: Duration::from_secs(30 * 60),
            ping_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn pg_config() -> ConnectionConfig {
        ConnectionConfig::new("t1", "c1", BackendKind::Postgres, "postgres://app@db.local/sales")
    }

    #[test]
    fn entry_key_equality_and_hash() {
        let mut map = HashMap::new();
        map.insert(EntryKey::new("t1", "c1"), 1);
        assert_eq!(map.get(&EntryKey::new("t1", "c1")), Some(&1));
        assert_ne!(EntryKey::new("t1", "c1"), EntryKey::new("t2", "c1"));
        assert_ne!(EntryKey::new("t1", "c1"), EntryKey::new("t1", "c2"));
    }

    #[test]
    fn entry_key_display() {
        assert_eq!(EntryKey::new("acme", "warehouse").to_string(), "acme/warehouse");
    }

    #[test]
    fn config_key_ignores_kind_and_uri() {
        let a = pg_config();
        let b = ConnectionConfig::new("t1", "c1", BackendKind::MySql, "mysql://other");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn backend_kind_display() {
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::MySql.to_string(), "mysql");
        assert_eq!(BackendKind::MongoDb.to_string(), "mongodb");
        assert_eq!(BackendKind::File.to_string(), "file");
    }

    #[test]
    fn backend_kind_serde_matches_display() {
        for kind in BackendKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn config_defaults_when_deserialized() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"tenant_id":"t1","connection_id":"c1","kind":"mongodb","uri":"mongodb://localhost"}"#,
        )
        .unwrap();
        assert_eq!(config.kind, BackendKind::MongoDb);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.connection_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn builder_methods_chain() {
        let config = pg_config()
            .with_max_connections(3)
            .with_connection_timeout(Duration::from_millis(250));
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connection_timeout_ms, 250);
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(pg_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let cases = [
            ConnectionConfig { tenant_id: " ".into(), ..pg_config() },
            ConnectionConfig { connection_id: String::new(), ..pg_config() },
            ConnectionConfig { uri: String::new(), ..pg_config() },
            ConnectionConfig { max_connections: 0, ..pg_config() },
            ConnectionConfig { connection_timeout_ms: 0, ..pg_config() },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PoolError::InvalidConfig { .. }), "{err}");
        }
    }

    #[test]
    fn huge_connection_timeout_saturates() {
        let config = pg_config().with_connection_timeout(Duration::MAX);
        assert_eq!(config.connection_timeout_ms, u64::MAX);

        let config = pg_config().with_connection_timeout(Duration::from_millis(1500));
        assert_eq!(config.connection_timeout_ms, 1500);
    }

    #[test]
    fn manager_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.health_check_interval, Duration::from_secs(300));
        assert_eq!(config.idle_reap_interval, Duration::from_secs(600));
        assert_eq!(config.idle_threshold, Duration::from_secs(1800));
        assert_eq!(config.ping_timeout, Duration::from_secs(5));
    }
}

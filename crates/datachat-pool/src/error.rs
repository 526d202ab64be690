//! Error types for adapters and the pool manager.

use std::time::Duration;

use crate::config::{BackendKind, EntryKey};

/// Errors raised by a [`BackendAdapter`](crate::adapter::BackendAdapter).
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("sql backend: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("document store: {0}")]
    Document(#[from] mongodb::error::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("handle mismatch: {expected} adapter received a {actual} handle")]
    HandleMismatch {
        expected: BackendKind,
        actual: &'static str,
    },

    #[error("{0}")]
    Backend(String),

    #[error("connection was evicted before it could be handed out")]
    Evicted,
}

/// Errors surfaced by the connection registry.
///
/// Only `BackendUnavailable`, `InvalidConfig`, `NoAdapter`, and `ShuttingDown`
/// are returned to callers. `HealthCheckFailure` and `CloseFailure` are built
/// by the sweeps for logging and never leave the crate's background tasks.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("database unavailable for {key} ({kind}): {source}")]
    BackendUnavailable {
        key: EntryKey,
        kind: BackendKind,
        #[source]
        source: AdapterError,
    },

    #[error("invalid connection config for {key}: {reason}")]
    InvalidConfig { key: EntryKey, reason: String },

    #[error("no adapter registered for backend kind {0}")]
    NoAdapter(BackendKind),

    #[error("connection manager is shutting down, no new connections accepted")]
    ShuttingDown,

    #[error("health check failed for {key}: {source}")]
    HealthCheckFailure {
        key: EntryKey,
        #[source]
        source: AdapterError,
    },

    #[error("closing {key} failed: {source}")]
    CloseFailure {
        key: EntryKey,
        #[source]
        source: AdapterError,
    },
}

impl PoolError {
    /// True when the caller could not get a working connection to the data source.
    ///
    /// The tool layer reports these as "database unavailable", separately
    /// from query errors on a healthy connection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PoolError::BackendUnavailable { .. })
    }
}

//! Backend adapters: per-kind strategies for opening, pinging, and closing
//! a customer data source.
//!
//! Each [`BackendKind`] maps to one [`BackendAdapter`] implementation. The
//! registry resolves the adapter once, when it creates an entry, and keeps it
//! alongside the handle so ping and close always go through the adapter that
//! opened it.
//!
//! | kind | adapter | handle |
//! |------|---------|--------|
//! | `postgres` | [`PostgresAdapter`] | `sqlx::PgPool` |
//! | `mysql` | [`MySqlAdapter`] | `sqlx::MySqlPool` |
//! | `mongodb` | [`MongoAdapter`] | `mongodb::Client` |
//! | `file` | [`FileAdapter`] | [`FileHandle`] |

pub mod document;
pub mod file;
pub mod relational;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BackendKind, ConnectionConfig};
use crate::error::AdapterError;

pub use document::MongoAdapter;
pub use file::{FileAdapter, FileHandle};
pub use relational::{MySqlAdapter, PostgresAdapter};

/// A live backend client. Cloning is cheap and shares the underlying pool.
#[derive(Clone, Debug)]
pub enum ConnectionHandle {
    Postgres(sqlx::PgPool),
    MySql(sqlx::MySqlPool),
    Document(mongodb::Client),
    File(FileHandle),
}

impl ConnectionHandle {
    /// Short variant name, used in handle-mismatch errors and logs.
    pub fn variant_name(&self) -> &'static str {
        match self {
            ConnectionHandle::Postgres(_) => "postgres",
            ConnectionHandle::MySql(_) => "mysql",
            ConnectionHandle::Document(_) => "mongodb",
            ConnectionHandle::File(_) => "file",
        }
    }

    pub fn as_file(&self) -> Option<&FileHandle> {
        match self {
            ConnectionHandle::File(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Opens, tests, and closes connections for one backend kind.
///
/// `open` is bounded by the registry with the config's connection timeout,
/// and `ping` with the manager's ping timeout; implementations may also
/// apply the timeout natively.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Establish a connection (or pool) for `config`.
    async fn open(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, AdapterError>;
    /// Round-trip to the backend. `Ok(())` means healthy.
    async fn ping(&self, handle: &ConnectionHandle) -> Result<(), AdapterError>;
    /// Release every resource held by `handle`.
    async fn close(&self, handle: &ConnectionHandle) -> Result<(), AdapterError>;
}

/// Run one adapter call on its own task, bounded by `timeout`.
///
/// A panic inside the adapter comes back as an error on this call instead of
/// unwinding into the sweep or registry operation that made it.
pub(crate) async fn call_isolated<F>(timeout: Duration, call: F) -> Result<(), AdapterError>
where
    F: Future<Output = Result<(), AdapterError>> + Send + 'static,
{
    let task = tokio::spawn(async move { tokio::time::timeout(timeout, call).await });
    match task.await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(AdapterError::Timeout(timeout)),
        Err(e) => Err(AdapterError::Backend(format!("adapter task failed: {e}"))),
    }
}

/// The adapter for `kind` from the built-in set.
fn standard_adapter(kind: BackendKind) -> Arc<dyn BackendAdapter> {
    match kind {
        BackendKind::Postgres => Arc::new(PostgresAdapter),
        BackendKind::MySql => Arc::new(MySqlAdapter),
        BackendKind::MongoDb => Arc::new(MongoAdapter),
        BackendKind::File => Arc::new(FileAdapter),
    }
}

/// Kind → adapter table, injected into the registry.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    /// An empty set; every kind must be registered with [`AdapterSet::with`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The production adapters for every [`BackendKind`].
    pub fn standard() -> Self {
        BackendKind::ALL
            .into_iter()
            .fold(Self::new(), |set, kind| set.with(kind, standard_adapter(kind)))
    }

    /// Builder method: register (or replace) the adapter for `kind`.
    pub fn with(mut self, kind: BackendKind, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn resolve(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for AdapterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSet")
            .field("kinds", &self.kinds())
            .finish()
    }
}

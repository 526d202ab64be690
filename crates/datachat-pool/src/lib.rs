//! datachat-pool: per-tenant connection pool manager for customer data sources.
//!
//! Keeps one live backend handle per `(tenant_id, connection_id)` and hands it
//! to the query tool layer on demand:
//! - **adapter**: per-kind open/ping/close strategies (Postgres, MySQL, MongoDB, file)
//! - **registry**: the keyed entry store, creation de-duplication, eviction
//! - **health**: periodic ping sweep that evicts unhealthy entries
//! - **reaper**: periodic sweep that closes idle entries with no active work
//! - **lifecycle**: starts both sweeps and drains everything on shutdown
//! - **manager**: the `ConnectionManager` facade callers hold
//!
//! # Architecture
//!
//! ```text
//! acquire(config)
//!   → ConnectionRegistry looks up (tenant_id, connection_id)
//!     → Healthy entry exists → bump active_queries, return handle
//!     → Absent / Unhealthy → take per-key creation guard
//!       → close stale entry, AdapterSet[kind].open(config) (bounded by timeout)
//!       → insert entry, return handle
//!
//! HealthCheckScheduler (5 min) ── ping every entry ── evict failures
//! IdleReaper (10 min) ─────────── evict idle > 30 min with no active queries
//! ```

pub mod adapter;
pub mod config;
pub mod entry;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod manager;
pub mod reaper;
pub mod registry;
pub mod stats;

pub use adapter::{AdapterSet, BackendAdapter, ConnectionHandle, FileAdapter, FileHandle};
pub use config::{BackendKind, ConnectionConfig, EntryKey, ManagerConfig};
pub use entry::Health;
pub use error::{AdapterError, PoolError};
pub use health::{HealthCheckScheduler, HealthSweep};
pub use lifecycle::{LifecycleController, ShutdownReport};
pub use manager::ConnectionManager;
pub use reaper::IdleReaper;
pub use registry::{ConnectionRegistry, Lease};
pub use stats::{EntryInfo, PoolStats};

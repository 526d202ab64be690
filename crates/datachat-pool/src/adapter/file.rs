//! File-backed data sources (uploaded CSV and spreadsheet files).
//!
//! No network handshake: `open` records the path, `ping` always succeeds,
//! and `close` moves the handle to its terminal closed state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{BackendAdapter, ConnectionHandle};
use crate::config::{BackendKind, ConnectionConfig};
use crate::error::AdapterError;

#[derive(Debug)]
struct FileHandleInner {
    path: PathBuf,
    closed: AtomicBool,
}

/// Shared handle to a file data source. Clones refer to the same handle.
#[derive(Clone, Debug)]
pub struct FileHandle {
    inner: Arc<FileHandleInner>,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileHandleInner {
                path: path.into(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Mark closed. Returns `false` if the handle was already closed.
    pub fn close(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::AcqRel)
    }

    /// True when both handles were produced by the same `open`.
    pub fn ptr_eq(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn file_handle(handle: &ConnectionHandle) -> Result<&FileHandle, AdapterError> {
    handle.as_file().ok_or(AdapterError::HandleMismatch {
        expected: BackendKind::File,
        actual: handle.variant_name(),
    })
}

/// Adapter for [`BackendKind::File`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FileAdapter;

#[async_trait]
impl BackendAdapter for FileAdapter {
    async fn open(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, AdapterError> {
        tracing::debug!(path = %config.uri, "recorded file data source");
        Ok(ConnectionHandle::File(FileHandle::new(&config.uri)))
    }

    async fn ping(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        file_handle(handle).map(|_| ())
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        let handle = file_handle(handle)?;
        if !handle.close() {
            tracing::debug!(path = %handle.path().display(), "file handle already closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_config() -> ConnectionConfig {
        ConnectionConfig::new("t1", "leads", BackendKind::File, "/srv/uploads/t1/leads.csv")
    }

    #[tokio::test]
    async fn open_records_path() {
        let handle = FileAdapter.open(&file_config()).await.unwrap();
        let file = handle.as_file().unwrap();
        assert_eq!(file.path(), Path::new("/srv/uploads/t1/leads.csv"));
        assert!(!file.is_closed());
    }

    #[tokio::test]
    async fn ping_is_always_healthy() {
        let handle = FileAdapter.open(&file_config()).await.unwrap();
        assert!(FileAdapter.ping(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn close_is_terminal_and_shared_by_clones() {
        let handle = FileAdapter.open(&file_config()).await.unwrap();
        let clone = handle.clone();
        FileAdapter.close(&handle).await.unwrap();
        assert!(clone.as_file().unwrap().is_closed());
        // A second close is harmless.
        assert!(FileAdapter.close(&clone).await.is_ok());
    }

    #[test]
    fn close_reports_first_transition_only() {
        let handle = FileHandle::new("/tmp/x.csv");
        assert!(handle.close());
        assert!(!handle.close());
    }

    #[test]
    fn ptr_eq_distinguishes_opens() {
        let a = FileHandle::new("/tmp/a.csv");
        let b = FileHandle::new("/tmp/a.csv");
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }
}

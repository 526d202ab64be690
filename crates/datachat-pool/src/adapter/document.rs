//! Document-store backend: MongoDB client via the official driver.
//!
//! The driver keeps its own connection pool per client; it is bounded by the
//! config's `max_connections`, and server selection fails after the
//! connection timeout instead of retrying forever.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::Client;

use super::{BackendAdapter, ConnectionHandle};
use crate::config::{BackendKind, ConnectionConfig};
use crate::error::AdapterError;

const ADMIN_DB: &str = "admin";

async fn ping_admin(client: &Client) -> Result<(), AdapterError> {
    client
        .database(ADMIN_DB)
        .run_command(doc! { "ping": 1 })
        .await?;
    Ok(())
}

/// Adapter for [`BackendKind::MongoDb`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MongoAdapter;

#[async_trait]
impl BackendAdapter for MongoAdapter {
    async fn open(&self, config: &ConnectionConfig) -> Result<ConnectionHandle, AdapterError> {
        let timeout = config.connection_timeout();
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.max_pool_size = Some(config.max_connections);
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);

        let client = Client::with_options(options)?;
        if let Err(e) = ping_admin(&client).await {
            client.shutdown().await;
            return Err(e);
        }
        tracing::debug!(
            tenant = %config.tenant_id,
            connection = %config.connection_id,
            max_pool_size = config.max_connections,
            "mongodb client opened"
        );
        Ok(ConnectionHandle::Document(client))
    }

    async fn ping(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        let ConnectionHandle::Document(client) = handle else {
            return Err(AdapterError::HandleMismatch {
                expected: BackendKind::MongoDb,
                actual: handle.variant_name(),
            });
        };
        ping_admin(client).await
    }

    async fn close(&self, handle: &ConnectionHandle) -> Result<(), AdapterError> {
        let ConnectionHandle::Document(client) = handle else {
            return Err(AdapterError::HandleMismatch {
                expected: BackendKind::MongoDb,
                actual: handle.variant_name(),
            });
        };
        client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::adapter::FileHandle;

    #[tokio::test]
    async fn open_rejects_malformed_uri() {
        let config = ConnectionConfig::new("t1", "events", BackendKind::MongoDb, "not-a-mongo-uri");
        let err = MongoAdapter.open(&config).await.unwrap_err();
        assert!(matches!(err, AdapterError::Document(_)), "{err}");
    }

    #[tokio::test]
    async fn open_unreachable_fails_after_server_selection() {
        let config =
            ConnectionConfig::new("t1", "events", BackendKind::MongoDb, "mongodb://127.0.0.1:1/")
                .with_connection_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(10), MongoAdapter.open(&config))
            .await
            .expect("server selection timeout should bound open");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn ping_rejects_foreign_handle() {
        let handle = ConnectionHandle::File(FileHandle::new("/tmp/events.csv"));
        let err = MongoAdapter.ping(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::HandleMismatch { expected: BackendKind::MongoDb, actual: "file" }
        ));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    identity::{BackendConfig, ObjectIdentity},
    local::LocalBackend,
    object_storage::ObjectStorageBackend,
    s3::S3ObjectClient,
    File, FileStoreResult,
};

/// Chunks buffered between a writer and its consumer when the caller does
/// not choose.
pub const DEFAULT_CONDUIT_CAPACITY: usize = 16;

/// Access intent for [`StorageBackend::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create the object, replacing any previous content.
    CreateWrite,
    /// Extend an existing object. Write offsets are relative to its current
    /// end.
    AppendWrite,
}

/// Produces [`File`] handles for logical objects.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn open(&self, identity: &ObjectIdentity, mode: OpenMode) -> FileStoreResult<File>;
}

/// Builds the backend `config` selects. An S3 backend shares one client
/// across every file it opens.
pub async fn backend_for(
    config: &BackendConfig,
    conduit_capacity: usize,
) -> FileStoreResult<Arc<dyn StorageBackend>> {
    debug!(?config, "building storage backend");
    Ok(match config {
        BackendConfig::Local { root } => {
            Arc::new(LocalBackend::new(root.clone()).with_read_capacity(conduit_capacity))
        }
        BackendConfig::S3 { .. } => {
            let client = S3ObjectClient::from_backend_config(config).await?;
            Arc::new(ObjectStorageBackend::new(client).with_conduit_capacity(conduit_capacity))
        }
    })
}

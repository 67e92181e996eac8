use std::sync::Arc;

use anyhow::{Context, Result};
use file_store::{ObjectIdentity, OpenMode, StorageBackend, UploadOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;
use worker::Dispatcher;

use crate::{config::GatewayConfig, upload::submit_chunks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub identity: String,
    pub bytes: u64,
    pub chunks: usize,
}

pub struct Service {
    pub config: Arc<GatewayConfig>,
    pub dispatcher: Arc<Dispatcher>,
    backend: Arc<dyn StorageBackend>,
}

impl Service {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let backend = file_store::backend_for(&config.storage, config.conduit_capacity).await?;
        Self::with_backend(config, backend)
    }

    /// Runs the service against an already built backend.
    pub fn with_backend(config: GatewayConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;
        let dispatcher = Arc::new(Dispatcher::new(config.worker_pool_size));
        dispatcher.run()?;
        info!(
            workers = config.worker_pool_size,
            chunk_size = config.chunk_size,
            "upload worker pool started"
        );
        Ok(Self {
            config: Arc::new(config),
            dispatcher,
            backend,
        })
    }

    /// Identity of `path` in the configured repository and storage.
    pub fn identity(&self, path: &str, options: UploadOptions) -> Result<ObjectIdentity> {
        Ok(ObjectIdentity::from_path(
            self.config.repository.clone(),
            path,
            self.config.storage.clone(),
        )?
        .with_options(options))
    }

    /// Streams `reader` into `identity` chunk by chunk and waits until the
    /// object is durable.
    pub async fn upload<R>(
        &self,
        identity: &ObjectIdentity,
        reader: R,
        mode: OpenMode,
    ) -> Result<UploadSummary>
    where
        R: AsyncRead + Unpin,
    {
        let file = Arc::new(
            self.backend
                .open(identity, mode)
                .await
                .with_context(|| format!("opening {} for upload", identity))?,
        );

        let submitted = submit_chunks(&self.dispatcher, &file, reader, self.config.chunk_size).await;
        // Close even when submission failed so queued chunks are waited for.
        let closed = file.close().await;
        let stats = submitted?;
        closed.with_context(|| format!("closing {}", identity))?;

        info!(file = %identity, bytes = stats.bytes, chunks = stats.chunks, "upload complete");
        Ok(UploadSummary {
            identity: identity.to_string(),
            bytes: stats.bytes,
            chunks: stats.chunks,
        })
    }

    /// Copies the content of `identity` into `dst`, returning the byte count.
    pub async fn download<W>(&self, identity: &ObjectIdentity, dst: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let file = self
            .backend
            .open(identity, OpenMode::Read)
            .await
            .with_context(|| format!("opening {} for download", identity))?;
        let bytes = file.copy_to(dst).await?;
        file.close().await?;
        info!(file = %identity, bytes, "download complete");
        Ok(bytes)
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

use std::sync::Arc;

use anyhow::Result;
use file_store::{BackendConfig, InMemoryObjectClient, ObjectStorageBackend};
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{config::GatewayConfig, service::Service};

pub struct TestService {
    pub service: Service,
    /// Shares its objects with the object storage backend, when there is one.
    pub objects: Option<InMemoryObjectClient>,
    // Keeps the local storage root alive for the duration of the test.
    pub storage_dir: TempDir,
}

fn init_test_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
    );
}

impl TestService {
    /// Service over a fresh local directory.
    pub async fn local(worker_pool_size: usize, chunk_size: usize) -> Result<Self> {
        init_test_logging();
        let storage_dir = tempfile::tempdir()?;
        let cfg = GatewayConfig {
            worker_pool_size,
            chunk_size,
            storage: BackendConfig::Local {
                root: storage_dir.path().to_path_buf(),
            },
            ..Default::default()
        };
        let service = Service::new(cfg).await?;
        Ok(Self {
            service,
            objects: None,
            storage_dir,
        })
    }

    /// Service over an in-memory object storage client.
    pub fn object_storage(worker_pool_size: usize, chunk_size: usize) -> Result<Self> {
        init_test_logging();
        let storage_dir = tempfile::tempdir()?;
        let cfg = GatewayConfig {
            worker_pool_size,
            chunk_size,
            storage: BackendConfig::S3 {
                bucket: "test-bucket".to_string(),
                region: None,
                access_key_id: None,
                secret_access_key: None,
                endpoint: None,
            },
            ..Default::default()
        };
        let objects = InMemoryObjectClient::new();
        let backend = ObjectStorageBackend::new(objects.clone())
            .with_conduit_capacity(cfg.conduit_capacity);
        let service = Service::with_backend(cfg, Arc::new(backend))?;
        Ok(Self {
            service,
            objects: Some(objects),
            storage_dir,
        })
    }
}

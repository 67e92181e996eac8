use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use file_store::BackendConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 900;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// `local` logs compact lines, anything else logs JSON.
    pub env: String,
    /// Repository name recorded in object identities.
    pub repository: String,
    pub worker_pool_size: usize,
    /// Largest slice of an upload handled by one chunk job.
    pub chunk_size: usize,
    /// Chunks buffered between an ordered writer and the remote upload.
    pub conduit_capacity: usize,
    pub storage: BackendConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            env: "local".to_string(),
            repository: "default".to_string(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            conduit_capacity: file_store::DEFAULT_CONDUIT_CAPACITY,
            storage: BackendConfig::Local {
                root: PathBuf::from("gateway_storage"),
            },
        }
    }
}

impl GatewayConfig {
    /// Loads a YAML file over the defaults. `GATEWAY_` prefixed environment
    /// variables override both.
    pub fn from_path(path: &Path) -> Result<GatewayConfig> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: GatewayConfig = Self::figment(&config_str)
            .merge(Env::prefixed("GATEWAY_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    pub fn from_yaml(config_str: &str) -> Result<GatewayConfig> {
        let config: GatewayConfig = Self::figment(config_str).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_str: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(GatewayConfig::default()))
            .merge(Yaml::string(config_str))
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(anyhow::anyhow!("worker_pool_size must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be at least 1"));
        }
        if self.conduit_capacity == 0 {
            return Err(anyhow::anyhow!("conduit_capacity must be at least 1"));
        }
        if self.repository.is_empty() {
            return Err(anyhow::anyhow!("repository must not be empty"));
        }
        if let BackendConfig::S3 { bucket, .. } = &self.storage {
            if bucket.is_empty() {
                return Err(anyhow::anyhow!("s3 storage requires a bucket"));
            }
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.worker_pool_size, 900);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert!(!config.structured_logging());
    }

    #[test]
    fn loads_s3_storage_from_yaml() {
        let config = GatewayConfig::from_yaml(
            r#"
env: production
worker_pool_size: 32
storage:
  type: s3
  bucket: uploads
  region: eu-west-1
  endpoint: http://localhost:9000
"#,
        )
        .unwrap();

        assert_eq!(config.worker_pool_size, 32);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.structured_logging());
        assert_eq!(
            config.storage,
            BackendConfig::S3 {
                bucket: "uploads".to_string(),
                region: Some("eu-west-1".to_string()),
                access_key_id: None,
                secret_access_key: None,
                endpoint: Some("http://localhost:9000".to_string()),
            }
        );
    }

    #[test]
    fn loads_local_storage_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "storage:\n  type: local\n  root: /srv/files\n").unwrap();

        let config = GatewayConfig::from_path(&path).unwrap();
        assert_eq!(
            config.storage,
            BackendConfig::Local {
                root: PathBuf::from("/srv/files")
            }
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(GatewayConfig::from_yaml("worker_pool_size: 0").is_err());
        assert!(GatewayConfig::from_yaml("chunk_size: 0").is_err());
        assert!(GatewayConfig::from_yaml("conduit_capacity: 0").is_err());
        assert!(GatewayConfig::from_yaml("storage:\n  type: s3\n  bucket: \"\"\n").is_err());
        assert!(GatewayConfig::from_yaml("storage:\n  type: ftp\n").is_err());
    }
}

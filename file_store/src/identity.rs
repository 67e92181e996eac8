//! Logical object identity: where an uploaded or downloaded object lives.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{FileStoreError, FileStoreResult};

/// Suffix appended to the basename of a partial (resumable) upload.
pub const PARTIAL_UPLOAD_SUFFIX: &str = ".dpart";

/// Backend selection, resolved once when a [`File`](crate::File) is opened.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Objects are plain files under `root`.
    Local { root: PathBuf },

    /// Objects are keyed by their logical path inside `bucket`.
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        /// Custom endpoint for S3 compatible services.
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendConfig::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            BackendConfig::S3 {
                bucket,
                region,
                access_key_id,
                secret_access_key,
                endpoint,
            } => f
                .debug_struct("S3")
                .field("bucket", bucket)
                .field("region", region)
                .field("access_key_id", access_key_id)
                .field(
                    "secret_access_key",
                    &secret_access_key.as_ref().map(|_| "<redacted>"),
                )
                .field("endpoint", endpoint)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Write to `<basename>.dpart` instead of the final name.
    #[serde(default)]
    pub partial_upload: bool,

    /// Size the complete object is expected to reach once every partial
    /// upload has landed. Informational only.
    #[serde(default)]
    pub partial_target_bytesize: Option<u64>,
}

/// Immutable description of one logical object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectIdentity {
    pub repository: String,
    /// Directory part of the logical path, without leading or trailing
    /// slashes. Empty for objects at the repository root.
    pub dir: String,
    pub basename: String,
    pub options: UploadOptions,
    pub backend: BackendConfig,
}

impl ObjectIdentity {
    /// Splits a logical path such as `/photos/2016/cat.jpg` into directory
    /// and basename.
    pub fn from_path(
        repository: impl Into<String>,
        path: &str,
        backend: BackendConfig,
    ) -> FileStoreResult<Self> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.contains(&"..") {
            return Err(FileStoreError::InvalidIdentity {
                path: path.to_string(),
                reason: "parent directory segments are not allowed".to_string(),
            });
        }
        let Some(basename) = segments.pop() else {
            return Err(FileStoreError::InvalidIdentity {
                path: path.to_string(),
                reason: "path has no file name".to_string(),
            });
        };

        Ok(Self {
            repository: repository.into(),
            dir: segments.join("/"),
            basename: basename.to_string(),
            options: UploadOptions::default(),
            backend,
        })
    }

    pub fn with_options(mut self, options: UploadOptions) -> Self {
        self.options = options;
        self
    }

    /// Basename of the object actually written, including the partial
    /// upload suffix when requested.
    pub fn target_basename(&self) -> String {
        if self.options.partial_upload {
            format!("{}{}", self.basename, PARTIAL_UPLOAD_SUFFIX)
        } else {
            self.basename.clone()
        }
    }

    /// Key of the object inside its bucket: `dir/basename`.
    pub fn object_key(&self) -> String {
        if self.dir.is_empty() {
            self.target_basename()
        } else {
            format!("{}/{}", self.dir, self.target_basename())
        }
    }

    /// Filesystem path of the object under `root`. The repository name is
    /// not part of the path.
    pub fn local_path(&self, root: &std::path::Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.dir.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(self.target_basename());
        path
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dir.is_empty() {
            write!(f, "repo://{}/{}", self.repository, self.target_basename())
        } else {
            write!(
                f,
                "repo://{}/{}/{}",
                self.repository,
                self.dir,
                self.target_basename()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn local() -> BackendConfig {
        BackendConfig::Local {
            root: PathBuf::from("/srv/data"),
        }
    }

    #[test]
    fn splits_dir_and_basename() {
        let id = ObjectIdentity::from_path("my-files", "/photos/2016/cat.jpg", local()).unwrap();
        assert_eq!(id.dir, "photos/2016");
        assert_eq!(id.basename, "cat.jpg");
        assert_eq!(id.object_key(), "photos/2016/cat.jpg");
        assert_eq!(
            id.local_path(Path::new("/srv/data")),
            PathBuf::from("/srv/data/photos/2016/cat.jpg")
        );
        assert_eq!(id.to_string(), "repo://my-files/photos/2016/cat.jpg");

        let root = ObjectIdentity::from_path("my-files", "notes.txt", local()).unwrap();
        assert_eq!(root.dir, "");
        assert_eq!(root.object_key(), "notes.txt");
    }

    #[test]
    fn collapses_empty_segments() {
        let id = ObjectIdentity::from_path("r", "//a//b///c.txt", local()).unwrap();
        assert_eq!(id.dir, "a/b");
        assert_eq!(id.basename, "c.txt");
        assert_eq!(id.object_key(), "a/b/c.txt");

        let id = ObjectIdentity::from_path("r", "/a//b.txt", local()).unwrap();
        assert_eq!(id.dir, "a");
        assert_eq!(id.object_key(), "a/b.txt");
        assert_eq!(id.to_string(), "repo://r/a/b.txt");
    }

    #[test]
    fn partial_upload_targets_dpart() {
        let id = ObjectIdentity::from_path("r", "/a/big.iso", local())
            .unwrap()
            .with_options(UploadOptions {
                partial_upload: true,
                partial_target_bytesize: Some(4096),
            });
        assert_eq!(id.object_key(), "a/big.iso.dpart");
        assert_eq!(id.basename, "big.iso");
    }

    #[test]
    fn rejects_bad_paths() {
        assert!(matches!(
            ObjectIdentity::from_path("r", "/", local()),
            Err(FileStoreError::InvalidIdentity { .. })
        ));
        assert!(matches!(
            ObjectIdentity::from_path("r", "/a/../etc/passwd", local()),
            Err(FileStoreError::InvalidIdentity { .. })
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let backend = BackendConfig::S3 {
            bucket: "b".to_string(),
            region: None,
            access_key_id: Some("AKIA".to_string()),
            secret_access_key: Some("hunter2".to_string()),
            endpoint: None,
        };
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}

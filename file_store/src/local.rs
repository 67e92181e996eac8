//! Local filesystem backend.

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    backend::{OpenMode, StorageBackend, DEFAULT_CONDUIT_CAPACITY},
    conduit::read_pipe,
    identity::ObjectIdentity,
    File, FileStoreError, FileStoreResult, FileWriter,
};

/// Stores objects as plain files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_capacity: usize,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_capacity: DEFAULT_CONDUIT_CAPACITY,
        }
    }

    pub fn with_read_capacity(mut self, capacity: usize) -> Self {
        self.read_capacity = capacity;
        self
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn open(&self, identity: &ObjectIdentity, mode: OpenMode) -> FileStoreResult<File> {
        let path = identity.local_path(&self.root);
        let name = identity.to_string();

        let file = match mode {
            OpenMode::Read => tokio::fs::File::open(&path).await,
            OpenMode::CreateWrite => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .await
            }
            OpenMode::AppendWrite => tokio::fs::OpenOptions::new().write(true).open(&path).await,
        }
        .map_err(|err| FileStoreError::from_open(&name, err))?;

        info!(file = %name, path = %path.display(), ?mode, "opened local file");

        if mode == OpenMode::Read {
            let reader = read_pipe(ReaderStream::new(file), self.read_capacity);
            return Ok(File::new(name, Some(reader), None, None));
        }

        let base = match mode {
            OpenMode::AppendWrite => file.metadata().await?.len(),
            _ => 0,
        };
        let writer = LocalWriter::new(file.into_std().await, base);
        Ok(File::new(name, None, Some(Arc::new(writer)), None))
    }
}

/// Positioned writes straight into the open descriptor. Concurrent writes to
/// distinct offsets need no lock.
#[derive(Debug)]
pub struct LocalWriter {
    file: Arc<std::fs::File>,
    /// Length of the file when it was opened for append, 0 otherwise.
    base: u64,
    /// End of the furthest write, relative to `base`.
    end: AtomicU64,
}

impl LocalWriter {
    fn new(file: std::fs::File, base: u64) -> Self {
        Self {
            file: Arc::new(file),
            base,
            end: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl FileWriter for LocalWriter {
    async fn write(&self, buf: Bytes) -> FileStoreResult<usize> {
        let offset = self.end.fetch_add(buf.len() as u64, Ordering::SeqCst);
        self.write_at(buf, offset).await
    }

    async fn write_at(&self, buf: Bytes, offset: u64) -> FileStoreResult<usize> {
        let len = buf.len();
        let (position, end) = self
            .base
            .checked_add(offset)
            .zip(offset.checked_add(len as u64))
            .filter(|(position, _)| position.checked_add(len as u64).is_some())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("write of {len} bytes at offset {offset} overflows the file size"),
                )
            })?;
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || write_all_at(&file, &buf, position))
            .await
            .map_err(io::Error::other)??;
        self.end.fetch_max(end, Ordering::SeqCst);
        Ok(len)
    }

    async fn close(&self) -> FileStoreResult<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(io::Error::other)??;
        Ok(())
    }
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(io::ErrorKind::WriteZero.into()),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use super::*;
    use crate::identity::BackendConfig;

    fn identity(root: &Path, path: &str) -> ObjectIdentity {
        ObjectIdentity::from_path(
            "local",
            path,
            BackendConfig::Local {
                root: root.to_path_buf(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn write_close_reopen_read() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "/docs/test.txt");

        let file = backend.open(&id, OpenMode::CreateWrite).await?;
        let guard = file.track();
        assert_eq!(file.write_at(Bytes::from_static(b"This is a test"), 0).await?, 14);
        drop(guard);
        file.close().await?;

        let file = backend.open(&id, OpenMode::Read).await?;
        assert_eq!(file.read_to_end().await?, b"This is a test");
        file.close().await?;
        Ok(())
    }

    #[tokio::test]
    async fn out_of_order_positioned_writes() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "digits");

        let file = Arc::new(backend.open(&id, OpenMode::CreateWrite).await?);
        let mut handles = Vec::new();
        for offset in (0..10u64).rev() {
            let file = file.clone();
            let guard = file.track();
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                file.write_at(Bytes::from(offset.to_string()), offset).await
            }));
        }
        file.close().await?;
        for handle in handles {
            handle.await??;
        }

        assert_eq!(tokio::fs::read(dir.path().join("digits")).await?, b"0123456789");
        Ok(())
    }

    #[tokio::test]
    async fn append_offsets_start_at_existing_end() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("log.txt"), b"head-").await?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "log.txt");

        let file = backend.open(&id, OpenMode::AppendWrite).await?;
        file.write_at(Bytes::from_static(b"tail"), 0).await?;
        file.write(Bytes::from_static(b"!")).await?;
        file.close().await?;

        assert_eq!(tokio::fs::read(dir.path().join("log.txt")).await?, b"head-tail!");
        Ok(())
    }

    #[tokio::test]
    async fn overflowing_offset_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("log.txt"), b"head-").await?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "log.txt");

        let file = backend.open(&id, OpenMode::AppendWrite).await?;
        for offset in [u64::MAX, u64::MAX - 5, u64::MAX - 8] {
            assert!(matches!(
                file.write_at(Bytes::from_static(b"tail"), offset).await,
                Err(FileStoreError::Io { source }) if source.kind() == io::ErrorKind::InvalidInput
            ));
        }
        assert!(matches!(
            file.close().await,
            Err(FileStoreError::IncompleteWrite { failed: 3, .. })
        ));

        assert_eq!(tokio::fs::read(dir.path().join("log.txt")).await?, b"head-");
        Ok(())
    }

    #[tokio::test]
    async fn create_truncates_previous_content() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("a.txt"), b"a much longer old body").await?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "a.txt");

        let file = backend.open(&id, OpenMode::CreateWrite).await?;
        file.write_at(Bytes::from_static(b"new"), 0).await?;
        file.close().await?;

        assert_eq!(tokio::fs::read(dir.path().join("a.txt")).await?, b"new");
        Ok(())
    }

    #[tokio::test]
    async fn missing_files_fail_to_open() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "/nope/missing.bin");

        for mode in [OpenMode::Read, OpenMode::AppendWrite] {
            assert!(matches!(
                backend.open(&id, mode).await,
                Err(FileStoreError::NotFound { .. })
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn read_only_file_has_no_writer() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        tokio::fs::write(dir.path().join("r.txt"), b"r").await?;
        let backend = LocalBackend::new(dir.path());
        let file = backend.open(&identity(dir.path(), "r.txt"), OpenMode::Read).await?;
        assert!(matches!(
            file.write_at(Bytes::from_static(b"x"), 0).await,
            Err(FileStoreError::NoWriter { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn partial_upload_writes_dpart() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let backend = LocalBackend::new(dir.path());
        let id = identity(dir.path(), "/big.iso").with_options(crate::UploadOptions {
            partial_upload: true,
            partial_target_bytesize: None,
        });

        let file = backend.open(&id, OpenMode::CreateWrite).await?;
        file.write_at(Bytes::from_static(b"part"), 0).await?;
        file.close().await?;

        assert!(dir.path().join("big.iso.dpart").exists());
        assert!(!dir.path().join("big.iso").exists());
        Ok(())
    }
}

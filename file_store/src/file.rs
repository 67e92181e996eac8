//! The handle returned by every storage backend.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWrite},
    sync::{oneshot, Mutex},
};
use tracing::{debug, info, warn};

use crate::{
    conduit::FileReader,
    join_group::{InFlightGuard, JoinGroup},
    FileStoreError, FileStoreResult,
};

/// Push side of a [`File`].
#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Writes `buf` after everything written so far.
    async fn write(&self, buf: Bytes) -> FileStoreResult<usize>;

    /// Writes `buf` at `offset` bytes from the start of this session.
    async fn write_at(&self, buf: Bytes, offset: u64) -> FileStoreResult<usize>;

    /// Flushes and releases the writer. Called once by [`File::close`].
    async fn close(&self) -> FileStoreResult<()>;
}

/// Receives the outcome of a backend's asynchronous finalize step.
pub type Completion = oneshot::Receiver<FileStoreResult<()>>;

/// One open logical object.
///
/// A file is opened either for reading or for writing, never both. Writers
/// call [`File::track`] once per submitted chunk and hold the guard until the
/// chunk is written; [`File::close`] waits for every guard before releasing
/// the backend, then waits again for the backend's finalize step when there
/// is one.
pub struct File {
    identity: String,
    reader: Option<Mutex<FileReader>>,
    writer: Option<Arc<dyn FileWriter>>,
    in_flight: JoinGroup,
    completion: Mutex<Option<Completion>>,
    failed_writes: AtomicUsize,
    closed: AtomicBool,
}

impl File {
    pub fn new(
        identity: impl Into<String>,
        reader: Option<FileReader>,
        writer: Option<Arc<dyn FileWriter>>,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            identity: identity.into(),
            reader: reader.map(Mutex::new),
            writer,
            in_flight: JoinGroup::new(),
            completion: Mutex::new(completion),
            failed_writes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Registers one pending write. Drop the guard when the write is done,
    /// successful or not.
    pub fn track(&self) -> InFlightGuard {
        self.in_flight.add()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.in_flight()
    }

    fn writer(&self) -> FileStoreResult<&Arc<dyn FileWriter>> {
        self.writer.as_ref().ok_or_else(|| FileStoreError::NoWriter {
            identity: self.identity.clone(),
        })
    }

    fn record<T>(&self, result: FileStoreResult<T>) -> FileStoreResult<T> {
        if result.is_err() {
            self.failed_writes.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    pub async fn write(&self, buf: Bytes) -> FileStoreResult<usize> {
        let writer = self.writer()?;
        self.record(writer.write(buf).await)
    }

    pub async fn write_at(&self, buf: Bytes, offset: u64) -> FileStoreResult<usize> {
        let writer = self.writer()?;
        self.record(writer.write_at(buf, offset).await)
    }

    async fn reader(&self) -> FileStoreResult<tokio::sync::MutexGuard<'_, FileReader>> {
        match &self.reader {
            Some(reader) => Ok(reader.lock().await),
            None => Err(FileStoreError::NoReader {
                identity: self.identity.clone(),
            }),
        }
    }

    /// Reads the next bytes into `buf`. Returns 0 at end of file.
    pub async fn read(&self, buf: &mut [u8]) -> FileStoreResult<usize> {
        let mut reader = self.reader().await?;
        Ok(reader.read(buf).await?)
    }

    pub async fn read_to_end(&self) -> FileStoreResult<Vec<u8>> {
        let mut reader = self.reader().await?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }

    /// Copies the remaining content into `dst`, returning the byte count.
    pub async fn copy_to<W>(&self, dst: &mut W) -> FileStoreResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut reader = self.reader().await?;
        Ok(tokio::io::copy(&mut *reader, dst).await?)
    }

    /// Waits for every tracked write, closes the writer and waits for the
    /// backend to finalize.
    ///
    /// There is no timeout: a tracked write that never finishes blocks this
    /// call forever.
    pub async fn close(&self) -> FileStoreResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(FileStoreError::AlreadyClosed {
                identity: self.identity.clone(),
            });
        }

        debug!(file = %self.identity, in_flight = self.in_flight(), "waiting for pending writes");
        self.in_flight.wait().await;

        let closed = match &self.writer {
            Some(writer) => writer.close().await,
            None => Ok(()),
        };

        let completion = self.completion.lock().await.take();
        let finalized = match completion {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(FileStoreError::Finalize {
                    identity: self.identity.clone(),
                    reason: "finalize task ended without reporting".to_string(),
                })
            }),
            None => Ok(()),
        };

        if let Err(err) = finalized {
            warn!(file = %self.identity, "finalize failed: {}", err);
            return Err(err);
        }
        closed?;

        let failed = self.failed_writes.load(Ordering::SeqCst);
        if failed > 0 {
            return Err(FileStoreError::IncompleteWrite {
                identity: self.identity.clone(),
                failed,
            });
        }

        info!(file = %self.identity, "file closed");
        Ok(())
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("identity", &self.identity)
            .field("readable", &self.reader.is_some())
            .field("writable", &self.writer.is_some())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

//! Chunked upload glue: slices an incoming byte stream and schedules one job
//! per slice on the worker pool.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use file_store::{File, InFlightGuard};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use worker::{Dispatcher, Job};

/// Writes one chunk at its offset. The file's in-flight count is released
/// when the job is dropped, so a failed, panicking or never-run job does not
/// stall [`File::close`].
pub struct UploadChunkJob {
    file: Arc<File>,
    buf: Bytes,
    offset: u64,
    _guard: InFlightGuard,
}

impl UploadChunkJob {
    pub fn new(file: Arc<File>, buf: Bytes, offset: u64) -> Self {
        let guard = file.track();
        Self {
            file,
            buf,
            offset,
            _guard: guard,
        }
    }

    pub fn num_bytes(&self) -> usize {
        self.buf.len()
    }
}

#[async_trait]
impl Job for UploadChunkJob {
    async fn run(self: Box<Self>) -> Result<()> {
        let num_bytes = self.num_bytes();
        self.file
            .write_at(self.buf.clone(), self.offset)
            .await
            .with_context(|| {
                format!(
                    "writing {} bytes at offset {} of {}",
                    num_bytes,
                    self.offset,
                    self.file.identity()
                )
            })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub bytes: u64,
    pub chunks: usize,
}

/// Reads `reader` sequentially in slices of at most `chunk_size` bytes and
/// submits an [`UploadChunkJob`] for each. Returns once every slice is
/// queued; call [`File::close`] to wait for the writes.
pub async fn submit_chunks<R>(
    dispatcher: &Dispatcher,
    file: &Arc<File>,
    mut reader: R,
    chunk_size: usize,
) -> Result<ChunkStats>
where
    R: AsyncRead + Unpin,
{
    let mut stats = ChunkStats::default();
    loop {
        let mut buf = Vec::with_capacity(chunk_size);
        let n = (&mut reader)
            .take(chunk_size as u64)
            .read_to_end(&mut buf)
            .await
            .with_context(|| format!("reading upload body at offset {}", stats.bytes))?;
        if n == 0 {
            break;
        }

        debug!(file = file.identity(), offset = stats.bytes, len = n, "submitting chunk");
        let job = UploadChunkJob::new(file.clone(), Bytes::from(buf), stats.bytes);
        dispatcher
            .add(job)
            .await
            .context("submitting upload chunk")?;

        stats.bytes += n as u64;
        stats.chunks += 1;
    }
    Ok(stats)
}

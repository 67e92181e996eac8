//! Bounded in-process byte channel with one writing end and one reading end.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, Stream, StreamExt};
use tokio::{io::AsyncRead, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::{FileStoreError, FileStoreResult};

/// Creates a conduit that buffers at most `capacity` chunks.
pub fn conduit(capacity: usize) -> (ConduitWriter, ConduitReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ConduitWriter { tx: Some(tx) }, ConduitReader { rx })
}

#[derive(Debug)]
pub struct ConduitWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ConduitWriter {
    /// Sends `buf` to the reader, suspending while the conduit is full.
    pub async fn send(&self, buf: Bytes) -> FileStoreResult<()> {
        let tx = self.tx.as_ref().ok_or(FileStoreError::ConduitClosed)?;
        tx.send(buf)
            .await
            .map_err(|_| FileStoreError::ConduitClosed)
    }

    /// Ends the stream seen by the reader. Further sends fail.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

#[derive(Debug)]
pub struct ConduitReader {
    rx: mpsc::Receiver<Bytes>,
}

impl ConduitReader {
    pub fn into_stream(self) -> BoxStream<'static, Bytes> {
        ReceiverStream::new(self.rx).boxed()
    }

    /// Collects everything until the writer closes.
    pub async fn read_all(mut self) -> Bytes {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.rx.recv().await {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

/// Reader handed out by a [`File`](crate::File) opened for reading.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Forwards `source` through a bounded channel from a background task and
/// returns the pulling end as an [`AsyncRead`].
pub(crate) fn read_pipe<S>(source: S, capacity: usize) -> FileReader
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(capacity.max(1));
    tokio::spawn(async move {
        let mut source = Box::pin(source);
        while let Some(item) = source.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    Box::new(StreamReader::new(ReceiverStream::new(rx)))
}

//! Serializes concurrent, out-of-order positioned writes into one ordered
//! byte stream.
//!
//! Object storage ingests an object as a single sequential body, while chunk
//! jobs run concurrently and finish in any order. Each chunk carries its
//! absolute offset, so the offset itself is the ordering token: a write at
//! `offset` waits until exactly `offset` bytes have been accepted, pushes its
//! bytes into the conduit and wakes every other waiter so the next offset can
//! proceed.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tracing::{debug, warn};

use crate::{conduit::ConduitWriter, FileStoreError, FileStoreResult, FileWriter};

#[derive(Debug)]
struct State {
    /// Bytes released into the conduit so far.
    accepted: u64,
    conduit: ConduitWriter,
    /// Offset of the write that failed, if any.
    poisoned: Option<u64>,
}

#[derive(Debug)]
pub struct OrderedWriter {
    state: Mutex<State>,
    advanced: Notify,
}

impl OrderedWriter {
    pub fn new(conduit: ConduitWriter) -> Self {
        Self {
            state: Mutex::new(State {
                accepted: 0,
                conduit,
                poisoned: None,
            }),
            advanced: Notify::new(),
        }
    }

    pub async fn accepted(&self) -> u64 {
        self.state.lock().await.accepted
    }

    /// Locks the state once `pred` holds, sleeping between advances.
    async fn wait_until<F>(&self, pred: F) -> MutexGuard<'_, State>
    where
        F: Fn(&State) -> bool,
    {
        loop {
            // Register interest before checking so an advance between the
            // check and the await is not missed.
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let state = self.state.lock().await;
            if pred(&state) {
                return state;
            }
            drop(state);
            notified.await;
        }
    }

    /// Pushes `buf` and advances the accepted count. Poisons the writer when
    /// the conduit rejects the bytes. Always wakes waiters.
    async fn release(
        &self,
        mut state: MutexGuard<'_, State>,
        buf: Bytes,
        offset: u64,
    ) -> FileStoreResult<usize> {
        let len = buf.len();
        let result = state.conduit.send(buf).await;
        match &result {
            Ok(()) => state.accepted += len as u64,
            Err(err) => {
                warn!(offset, len, "ordered write failed, poisoning writer: {}", err);
                state.poisoned = Some(offset);
            }
        }
        drop(state);
        self.advanced.notify_waiters();
        result.map(|()| len)
    }
}

#[async_trait]
impl FileWriter for OrderedWriter {
    async fn write(&self, buf: Bytes) -> FileStoreResult<usize> {
        let state = self.state.lock().await;
        if let Some(at) = state.poisoned {
            return Err(FileStoreError::WriterPoisoned { offset: at });
        }
        let offset = state.accepted;
        self.release(state, buf, offset).await
    }

    async fn write_at(&self, buf: Bytes, offset: u64) -> FileStoreResult<usize> {
        let state = self
            .wait_until(|s| s.poisoned.is_some() || s.accepted >= offset)
            .await;
        if let Some(at) = state.poisoned {
            return Err(FileStoreError::WriterPoisoned { offset: at });
        }
        if state.accepted > offset {
            // Producers hand out contiguous, non-overlapping ranges. Nothing
            // here enforces it.
            warn!(
                offset,
                accepted = state.accepted,
                "overlapping write, bytes will be duplicated"
            );
        }
        debug!(offset, len = buf.len(), "releasing chunk");
        self.release(state, buf, offset).await
    }

    async fn close(&self) -> FileStoreResult<()> {
        let mut state = self.state.lock().await;
        state.conduit.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::conduit::conduit;

    #[tokio::test]
    async fn reverse_order_writes_arrive_in_offset_order() {
        let (tx, rx) = conduit(16);
        let writer = Arc::new(OrderedWriter::new(tx));
        let collector = tokio::spawn(rx.read_all());

        let mut handles = Vec::new();
        for offset in (0..10u64).rev() {
            let writer = writer.clone();
            let byte = Bytes::from(offset.to_string());
            handles.push(tokio::spawn(async move {
                writer.write_at(byte, offset).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
        writer.close().await.unwrap();

        assert_eq!(collector.await.unwrap(), Bytes::from_static(b"0123456789"));
        assert_eq!(writer.accepted().await, 10);
    }

    #[tokio::test]
    async fn later_offset_waits_for_its_predecessor() {
        let (tx, rx) = conduit(16);
        let writer = Arc::new(OrderedWriter::new(tx));

        let tail = tokio::spawn({
            let writer = writer.clone();
            async move { writer.write_at(Bytes::from_static(b"world"), 6).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!tail.is_finished());
        assert_eq!(writer.accepted().await, 0);

        writer
            .write_at(Bytes::from_static(b"hello "), 0)
            .await
            .unwrap();
        assert_eq!(tail.await.unwrap().unwrap(), 5);

        writer.close().await.unwrap();
        assert_eq!(rx.read_all().await, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn sequential_writes_append() {
        let (tx, rx) = conduit(4);
        let writer = OrderedWriter::new(tx);
        writer.write(Bytes::from_static(b"ab")).await.unwrap();
        writer.write_at(Bytes::from_static(b"cd"), 2).await.unwrap();
        writer.write(Bytes::from_static(b"ef")).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(rx.read_all().await, Bytes::from_static(b"abcdef"));
    }

    #[tokio::test]
    async fn failed_write_poisons_and_wakes_waiters() {
        let (tx, rx) = conduit(1);
        let writer = Arc::new(OrderedWriter::new(tx));

        let waiter = tokio::spawn({
            let writer = writer.clone();
            async move { writer.write_at(Bytes::from_static(b"b"), 1).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(rx);
        let first = writer.write_at(Bytes::from_static(b"a"), 0).await;
        assert!(matches!(first, Err(FileStoreError::ConduitClosed)));

        let woken = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be woken")
            .unwrap();
        assert!(matches!(
            woken,
            Err(FileStoreError::WriterPoisoned { offset: 0 })
        ));
        assert!(matches!(
            writer.write(Bytes::from_static(b"c")).await,
            Err(FileStoreError::WriterPoisoned { offset: 0 })
        ));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (tx, _rx) = conduit(1);
        let writer = OrderedWriter::new(tx);
        writer.close().await.unwrap();
        assert!(matches!(
            writer.write_at(Bytes::from_static(b"x"), 0).await,
            Err(FileStoreError::ConduitClosed)
        ));
    }
}

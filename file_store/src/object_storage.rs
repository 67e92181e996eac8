//! Object storage backend.
//!
//! Writes go through an [`OrderedWriter`] whose conduit feeds a background
//! task:
//!
//! - create: the conduit is the body of a single streaming put.
//! - append: the existing object is copied server side as part 1 of a
//!   multipart upload, the conduit is buffered in memory and uploaded as
//!   part 2, then the upload is completed. The appended tail must fit in
//!   memory, and real S3 rejects a part 1 smaller than 5 MiB.
//!
//! The task reports its outcome on the file's completion channel, which
//! [`File::close`] waits on after closing the writer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    backend::{OpenMode, StorageBackend, DEFAULT_CONDUIT_CAPACITY},
    client::ObjectStorageClient,
    conduit::{conduit, read_pipe, ConduitReader},
    identity::ObjectIdentity,
    ordered_writer::OrderedWriter,
    File, FileStoreError, FileStoreResult,
};

pub struct ObjectStorageBackend<C> {
    client: Arc<C>,
    conduit_capacity: usize,
}

impl<C: ObjectStorageClient> ObjectStorageBackend<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
            conduit_capacity: DEFAULT_CONDUIT_CAPACITY,
        }
    }

    pub fn with_conduit_capacity(mut self, capacity: usize) -> Self {
        self.conduit_capacity = capacity;
        self
    }

    fn open_writer<F, Fut>(&self, name: String, finalize: F) -> File
    where
        F: FnOnce(Arc<C>, ConduitReader) -> Fut,
        Fut: std::future::Future<Output = FileStoreResult<()>> + Send + 'static,
    {
        let (tx, rx) = conduit(self.conduit_capacity);
        let (done_tx, done_rx) = oneshot::channel();
        let task = finalize(self.client.clone(), rx);
        let file = name.clone();
        tokio::spawn(async move {
            let result = task.await;
            if let Err(err) = &result {
                error!(file = %file, "object upload failed: {}", err);
            }
            let _ = done_tx.send(result);
        });
        File::new(
            name,
            None,
            Some(Arc::new(OrderedWriter::new(tx))),
            Some(done_rx),
        )
    }
}

#[async_trait]
impl<C: ObjectStorageClient> StorageBackend for ObjectStorageBackend<C> {
    async fn open(&self, identity: &ObjectIdentity, mode: OpenMode) -> FileStoreResult<File> {
        let key = identity.object_key();
        let name = identity.to_string();
        info!(file = %name, key = %key, ?mode, "opening object");

        match mode {
            OpenMode::Read => {
                let stream = self.client.get_stream(&key).await.map_err(|err| match err {
                    FileStoreError::NotFound { .. } => FileStoreError::NotFound {
                        identity: name.clone(),
                    },
                    other => other,
                })?;
                let reader = read_pipe(stream, self.conduit_capacity);
                Ok(File::new(name, Some(reader), None, None))
            }
            OpenMode::CreateWrite => Ok(self.open_writer(name.clone(), move |client, body| {
                put_object(client, key, name, body)
            })),
            OpenMode::AppendWrite => Ok(self.open_writer(name.clone(), move |client, body| {
                append_object(client, key, name, body)
            })),
        }
    }
}

async fn put_object<C: ObjectStorageClient>(
    client: Arc<C>,
    key: String,
    name: String,
    body: ConduitReader,
) -> FileStoreResult<()> {
    let bytes = client.put_stream(&key, body.into_stream()).await?;
    info!(file = %name, bytes, "object uploaded");
    Ok(())
}

async fn append_object<C: ObjectStorageClient>(
    client: Arc<C>,
    key: String,
    name: String,
    body: ConduitReader,
) -> FileStoreResult<()> {
    let upload_id = client.create_multipart_upload(&key).await?;

    let result = async {
        let head = client.upload_part_copy(&key, &upload_id, 1, &key).await?;
        let tail = body.read_all().await;
        let bytes = tail.len();
        let tail = client.upload_part(&key, &upload_id, 2, tail).await?;
        client
            .complete_multipart_upload(&key, &upload_id, vec![head, tail])
            .await?;
        info!(file = %name, bytes, "object appended");
        Ok::<_, FileStoreError>(())
    }
    .await;

    if result.is_err() {
        if let Err(err) = client.abort_multipart_upload(&key, &upload_id).await {
            warn!(file = %name, upload_id = %upload_id, "failed to abort multipart upload: {}", err);
        }
    }
    result
}

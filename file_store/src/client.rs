//! The object storage calls the object storage backend is built on.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::FileStoreResult;

/// A part accepted by the service, as reported back on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Minimal client surface over an S3 style service. Keys are relative to
/// the bucket the client was built for.
#[async_trait]
pub trait ObjectStorageClient: Send + Sync + 'static {
    /// Uploads `body` as the whole content of `key`, returning the number of
    /// bytes stored. Resolves only once `body` ends.
    async fn put_stream(&self, key: &str, body: BoxStream<'static, Bytes>) -> FileStoreResult<u64>;

    async fn get_stream(&self, key: &str)
        -> FileStoreResult<BoxStream<'static, io::Result<Bytes>>>;

    /// Starts a multipart upload and returns its upload id.
    async fn create_multipart_upload(&self, key: &str) -> FileStoreResult<String>;

    /// Copies the current content of `source_key` server side as one part.
    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> FileStoreResult<CompletedPart>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> FileStoreResult<CompletedPart>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> FileStoreResult<()>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> FileStoreResult<()>;
}

//! Map-backed [`ObjectStorageClient`] for tests and local runs without an
//! object storage service.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};

use crate::{
    client::{CompletedPart, ObjectStorageClient},
    FileStoreError, FileStoreResult,
};

/// One call received by an [`InMemoryObjectClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    PutStream { key: String, bytes: u64 },
    GetStream { key: String },
    CreateMultipartUpload { key: String },
    UploadPartCopy { key: String, part_number: i32, source_key: String },
    UploadPart { key: String, part_number: i32, bytes: usize },
    CompleteMultipartUpload { key: String, parts: usize },
    AbortMultipartUpload { key: String },
}

/// Calls that can be made to fail with [`InMemoryObjectClient::fail_on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    PutStream,
    GetStream,
    CreateMultipartUpload,
    UploadPartCopy,
    UploadPart,
    CompleteMultipartUpload,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Bytes>,
    uploads: HashMap<String, PendingUpload>,
    calls: Vec<ClientCall>,
    failures: HashSet<FailPoint>,
    next_upload_id: u64,
}

/// Cheap to clone; clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectClient {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.lock().objects.insert(key.into(), body.into());
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).cloned()
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.lock().calls.clone()
    }

    /// Multipart uploads created but neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Makes every later call of `point` fail.
    pub fn fail_on(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    fn check(inner: &Inner, point: FailPoint, operation: &'static str) -> FileStoreResult<()> {
        if inner.failures.contains(&point) {
            return Err(FileStoreError::object_storage(
                operation,
                anyhow::anyhow!("injected failure"),
            ));
        }
        Ok(())
    }

    fn etag(part_number: i32, body: &[u8]) -> String {
        format!("\"{part_number}-{}\"", body.len())
    }
}

#[async_trait]
impl ObjectStorageClient for InMemoryObjectClient {
    async fn put_stream(
        &self,
        key: &str,
        mut body: BoxStream<'static, Bytes>,
    ) -> FileStoreResult<u64> {
        Self::check(&self.lock(), FailPoint::PutStream, "put_stream")?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk);
        }
        let bytes = buf.len() as u64;

        let mut inner = self.lock();
        inner.calls.push(ClientCall::PutStream {
            key: key.to_string(),
            bytes,
        });
        inner.objects.insert(key.to_string(), buf.freeze());
        Ok(bytes)
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> FileStoreResult<BoxStream<'static, io::Result<Bytes>>> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::GetStream {
            key: key.to_string(),
        });
        Self::check(&inner, FailPoint::GetStream, "get_stream")?;

        let body = inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound {
                identity: key.to_string(),
            })?;
        let chunks: Vec<io::Result<Bytes>> = body
            .chunks(4096)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn create_multipart_upload(&self, key: &str) -> FileStoreResult<String> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::CreateMultipartUpload {
            key: key.to_string(),
        });
        Self::check(&inner, FailPoint::CreateMultipartUpload, "create_multipart_upload")?;

        inner.next_upload_id += 1;
        let upload_id = format!("upload-{}", inner.next_upload_id);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> FileStoreResult<CompletedPart> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::UploadPartCopy {
            key: key.to_string(),
            part_number,
            source_key: source_key.to_string(),
        });
        Self::check(&inner, FailPoint::UploadPartCopy, "upload_part_copy")?;

        let source = inner
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound {
                identity: source_key.to_string(),
            })?;
        let e_tag = Self::etag(part_number, &source);
        let upload = inner.uploads.get_mut(upload_id).ok_or_else(|| {
            FileStoreError::object_storage(
                "upload_part_copy",
                anyhow::anyhow!("no such upload {upload_id}"),
            )
        })?;
        upload.parts.insert(part_number, (e_tag.clone(), source));
        Ok(CompletedPart { part_number, e_tag })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> FileStoreResult<CompletedPart> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::UploadPart {
            key: key.to_string(),
            part_number,
            bytes: body.len(),
        });
        Self::check(&inner, FailPoint::UploadPart, "upload_part")?;

        let e_tag = Self::etag(part_number, &body);
        let upload = inner.uploads.get_mut(upload_id).ok_or_else(|| {
            FileStoreError::object_storage("upload_part", anyhow::anyhow!("no such upload {upload_id}"))
        })?;
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(CompletedPart { part_number, e_tag })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> FileStoreResult<()> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::CompleteMultipartUpload {
            key: key.to_string(),
            parts: parts.len(),
        });
        Self::check(&inner, FailPoint::CompleteMultipartUpload, "complete_multipart_upload")?;

        let upload = inner.uploads.remove(upload_id).ok_or_else(|| {
            FileStoreError::object_storage(
                "complete_multipart_upload",
                anyhow::anyhow!("no such upload {upload_id}"),
            )
        })?;

        let mut body = BytesMut::new();
        for part in &parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, bytes)) if *e_tag == part.e_tag => body.extend_from_slice(bytes),
                _ => {
                    return Err(FileStoreError::object_storage(
                        "complete_multipart_upload",
                        anyhow::anyhow!("invalid part {}", part.part_number),
                    ))
                }
            }
        }
        inner.objects.insert(upload.key, body.freeze());
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> FileStoreResult<()> {
        let mut inner = self.lock();
        inner.calls.push(ClientCall::AbortMultipartUpload {
            key: key.to_string(),
        });
        inner.uploads.remove(upload_id);
        Ok(())
    }
}

//! S3 client using object_store for streaming data and aws-sdk-s3 for the
//! multipart copy calls object_store does not expose.

use std::{io, sync::Arc};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart},
    Client as S3Client,
};
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as ObjectPath,
    ObjectStore,
    WriteMultipart,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::debug;

use crate::{
    client::{CompletedPart, ObjectStorageClient},
    identity::BackendConfig,
    FileStoreError,
    FileStoreResult,
};

/// Characters left unescaped in a copy source key, `/` included.
const COPY_SOURCE_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

const CREDENTIALS_PROVIDER: &str = "transfer-gateway";

pub struct S3ObjectClient {
    /// Streaming put and get.
    object_store: Arc<AmazonS3>,

    /// Multipart create, copy, upload, complete and abort.
    s3_client: S3Client,

    bucket: String,
}

impl S3ObjectClient {
    /// Builds both clients from an S3 backend configuration. Static
    /// credentials are used when both halves are given, the default AWS
    /// chain otherwise.
    pub async fn from_backend_config(config: &BackendConfig) -> FileStoreResult<Self> {
        let BackendConfig::S3 {
            bucket,
            region,
            access_key_id,
            secret_access_key,
            endpoint,
        } = config
        else {
            return Err(FileStoreError::object_storage(
                "configure",
                anyhow::anyhow!("not an S3 backend: {:?}", config),
            ));
        };
        if bucket.is_empty() {
            return Err(FileStoreError::object_storage(
                "configure",
                anyhow::anyhow!("bucket name is empty"),
            ));
        }
        let credentials = access_key_id.as_ref().zip(secret_access_key.as_ref());

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some((key_id, secret)) = credentials {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }
        if let Some(endpoint) = endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        let object_store = builder
            .build()
            .map_err(|e| FileStoreError::object_storage("configure", e))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some((key_id, secret)) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                CREDENTIALS_PROVIDER,
            ));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        debug!(bucket = %bucket, endpoint = ?endpoint, "created S3 client");

        Ok(Self {
            object_store: Arc::new(object_store),
            s3_client: S3Client::from_conf(s3_config),
            bucket: bucket.clone(),
        })
    }

    /// The stored location of `key`. Every call, streaming and multipart,
    /// addresses the object through this path so both clients agree on the
    /// escaped form of reserved characters.
    fn object_path(key: &str) -> ObjectPath {
        ObjectPath::from(key)
    }

    fn copy_source(&self, path: &ObjectPath) -> String {
        format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(path.as_ref(), COPY_SOURCE_ENCODE_SET)
        )
    }
}

#[async_trait]
impl ObjectStorageClient for S3ObjectClient {
    async fn put_stream(
        &self,
        key: &str,
        mut body: BoxStream<'static, Bytes>,
    ) -> FileStoreResult<u64> {
        let path = Self::object_path(key);
        let upload = self.object_store.put_multipart(&path).await?;
        let mut writer = WriteMultipart::new(upload);
        let mut size_bytes = 0;
        while let Some(chunk) = body.next().await {
            if let Err(err) = writer.wait_for_capacity(1).await {
                let _ = writer.abort().await;
                return Err(err.into());
            }
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await?;
        Ok(size_bytes)
    }

    async fn get_stream(
        &self,
        key: &str,
    ) -> FileStoreResult<BoxStream<'static, io::Result<Bytes>>> {
        let result = self.object_store.get(&Self::object_path(key)).await?;
        Ok(result.into_stream().map_err(io::Error::other).boxed())
    }

    async fn create_multipart_upload(&self, key: &str) -> FileStoreResult<String> {
        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(Self::object_path(key).to_string())
            .send()
            .await
            .map_err(|e| FileStoreError::object_storage("create_multipart_upload", e))?;

        output.upload_id().map(str::to_string).ok_or_else(|| {
            FileStoreError::object_storage(
                "create_multipart_upload",
                anyhow::anyhow!("no upload id returned"),
            )
        })
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_key: &str,
    ) -> FileStoreResult<CompletedPart> {
        let output = self
            .s3_client
            .upload_part_copy()
            .bucket(&self.bucket)
            .key(Self::object_path(key).to_string())
            .upload_id(upload_id)
            .part_number(part_number)
            .copy_source(self.copy_source(&Self::object_path(source_key)))
            .send()
            .await
            .map_err(|e| FileStoreError::object_storage("upload_part_copy", e))?;

        let e_tag = output
            .copy_part_result()
            .and_then(|r| r.e_tag())
            .ok_or_else(|| {
                FileStoreError::object_storage(
                    "upload_part_copy",
                    anyhow::anyhow!("no etag returned for copied part"),
                )
            })?;
        Ok(CompletedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> FileStoreResult<CompletedPart> {
        let output = self
            .s3_client
            .upload_part()
            .bucket(&self.bucket)
            .key(Self::object_path(key).to_string())
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| FileStoreError::object_storage("upload_part", e))?;

        let e_tag = output.e_tag().ok_or_else(|| {
            FileStoreError::object_storage("upload_part", anyhow::anyhow!("no etag returned"))
        })?;
        Ok(CompletedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> FileStoreResult<()> {
        let parts: Vec<S3CompletedPart> = parts
            .into_iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .e_tag(part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.s3_client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(Self::object_path(key).to_string())
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(|e| FileStoreError::object_storage("complete_multipart_upload", e))?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> FileStoreResult<()> {
        self.s3_client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(Self::object_path(key).to_string())
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| FileStoreError::object_storage("abort_multipart_upload", e))?;

        Ok(())
    }
}

//! S3 blob backend built on `object_store`.
//!
//! Works against AWS or any S3-compatible endpoint (MinIO, Spaces, ...).
//! Small bodies are sent in one PUT; larger ones are streamed as a multipart
//! upload that is aborted if the request body fails.

use crate::{
    config::S3Config,
    models::upload::StoredObject,
    services::blob_store::{BlobError, BlobResult, BlobStore, BlobStream},
};
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use object_store::{
    Error as ObjectStoreError, ObjectStoreExt, PutPayload, WriteMultipart,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path,
};
use std::time::Instant;

/// Key probed by the readiness check. It does not need to exist.
const PROBE_KEY: &str = ".upload-gateway-ready";

/// Largest body sent as a single PUT; S3's minimum multipart part size.
const SINGLE_PUT_LIMIT: usize = 5 * 1024 * 1024;

const MAX_PARTS_IN_FLIGHT: usize = 4;

#[derive(Clone, Debug)]
pub struct S3BlobStore {
    store: AmazonS3,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(config: &S3Config) -> BlobResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(config.region.clone())
            .with_bucket_name(config.bucket.clone());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id.clone())
                .with_secret_access_key(secret.clone());
        }

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder
            .build()
            .map_err(|e| BlobError::Config(e.to_string()))?;

        Ok(Self {
            store,
            bucket: config.bucket.clone(),
        })
    }

    fn backend_error(
        &self,
        err: ObjectStoreError,
        key: &str,
        size_bytes: i64,
        start: Instant,
    ) -> BlobError {
        tracing::error!(
            error = %err,
            bucket = %self.bucket,
            key = %key,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload failed"
        );
        BlobError::Backend(err.to_string())
    }

    async fn abort_multipart(&self, writer: WriteMultipart, key: &str) {
        if let Err(err) = writer.abort().await {
            tracing::warn!(error = %err, bucket = %self.bucket, key = %key, "S3 multipart abort failed");
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put_stream(&self, key: &str, mut body: BlobStream<'_>) -> BlobResult<StoredObject> {
        let start = Instant::now();
        let location = Path::from(key.to_string());
        let mut digest = md5::Context::new();
        let mut size_bytes: i64 = 0;

        // Bodies up to SINGLE_PUT_LIMIT go out as one PUT. Larger ones switch
        // to a multipart upload, which S3 only publishes on completion.
        let mut buffer = BytesMut::new();
        let mut multipart: Option<WriteMultipart> = None;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    if let Some(writer) = multipart {
                        self.abort_multipart(writer, key).await;
                    }
                    return Err(BlobError::Body(err));
                }
            };
            digest.consume(&chunk);
            size_bytes += chunk.len() as i64;

            if let Some(writer) = multipart.as_mut() {
                let waited = writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await;
                if let Err(e) = waited {
                    if let Some(writer) = multipart.take() {
                        self.abort_multipart(writer, key).await;
                    }
                    return Err(self.backend_error(e, key, size_bytes, start));
                }
                writer.put(chunk);
                continue;
            }

            buffer.extend_from_slice(&chunk);
            if buffer.len() > SINGLE_PUT_LIMIT {
                let upload = self
                    .store
                    .put_multipart(&location)
                    .await
                    .map_err(|e| self.backend_error(e, key, size_bytes, start))?;
                let mut writer = WriteMultipart::new(upload);
                writer.put(buffer.split().freeze());
                multipart = Some(writer);
            }
        }

        let result = match multipart {
            Some(writer) => writer.finish().await,
            None => {
                self.store
                    .put(&location, PutPayload::from(buffer.freeze()))
                    .await
            }
        }
        .map_err(|e| self.backend_error(e, key, size_bytes, start))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        let etag = result
            .e_tag
            .map(|tag| tag.trim_matches('"').to_string())
            .unwrap_or_else(|| format!("{:x}", digest.compute()));

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag,
        })
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let location = Path::from(key.to_string());
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {
                tracing::debug!(bucket = %self.bucket, key = %key, "S3 object deleted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, bucket = %self.bucket, key = %key, "S3 delete failed");
                Err(BlobError::Backend(e.to_string()))
            }
        }
    }

    async fn ping(&self) -> BlobResult<()> {
        match self.store.head(&Path::from(PROBE_KEY)).await {
            Ok(_) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(BlobError::Backend(e.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

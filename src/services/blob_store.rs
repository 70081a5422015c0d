//! Blob storage capability used by the upload coordinator.
//!
//! Backends receive the request body as a stream and report how many bytes
//! they wrote. Two backends exist: local disk ([`DiskBlobStore`]) and S3
//! through `object_store` ([`S3BlobStore`]).
//!
//! [`DiskBlobStore`]: super::disk_store::DiskBlobStore
//! [`S3BlobStore`]: super::s3_store::S3BlobStore

use crate::{
    config::StorageConfig,
    models::upload::StoredObject,
    services::{disk_store::DiskBlobStore, s3_store::S3BlobStore},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, pin::Pin, sync::Arc};
use thiserror::Error;

/// Request body as handed to a backend.
pub type BlobStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    /// Reading the request body failed; nothing was stored.
    #[error("reading upload body: {0}")]
    Body(io::Error),
    #[error("object store backend: {0}")]
    Backend(String),
    #[error("object store configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `body` under `key`, returning what was stored.
    ///
    /// On error no object is left behind under `key`.
    async fn put_stream(&self, key: &str, body: BlobStream<'_>) -> BlobResult<StoredObject>;

    /// Remove the object at `key`. Missing objects are not an error.
    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Cheap reachability probe used by the readiness endpoint.
    async fn ping(&self) -> BlobResult<()>;

    /// Short backend name for logs and readiness output.
    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend.
pub fn build_blob_store(config: &StorageConfig) -> BlobResult<Arc<dyn BlobStore>> {
    match config {
        StorageConfig::Disk { dir } => Ok(Arc::new(DiskBlobStore::new(dir.clone()))),
        StorageConfig::S3(s3) => Ok(Arc::new(S3BlobStore::new(s3)?)),
    }
}

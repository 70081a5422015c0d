//! In-memory stores and request builders shared by unit tests.

use crate::{
    models::upload::{StoredObject, UploadRecord},
    routes::routes::build_app,
    services::{
        blob_store::{BlobError, BlobResult, BlobStore, BlobStream},
        record_store::{RecordError, RecordResult, RecordStore},
        upload_service::{UploadService, UploadSettings},
    },
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::HashMap,
    io,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tower_http::cors::CorsLayer;

pub const BOUNDARY: &str = "X-UPLOAD-GATEWAY-BOUNDARY";

/// Record store keeping rows in a map; optionally fails every insert.
#[derive(Default)]
pub struct MemoryRecordStore {
    rows: Mutex<HashMap<String, UploadRecord>>,
    attempts: AtomicUsize,
    fail: bool,
    fail_commit: bool,
}

impl MemoryRecordStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Keeps the row but reports the commit as failed.
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    pub fn get(&self, filename: &str) -> Option<UploadRecord> {
        self.rows.lock().unwrap().get(filename).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn insert_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_unique(&self, record: &UploadRecord) -> RecordResult<UploadRecord> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RecordError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.filename) {
            return Err(RecordError::Duplicate(record.filename.clone()));
        }
        rows.insert(record.filename.clone(), record.clone());
        if self.fail_commit {
            return Err(RecordError::Commit(sqlx::Error::Io(io::Error::other(
                "connection reset during commit",
            ))));
        }
        Ok(record.clone())
    }

    async fn ping(&self) -> RecordResult<()> {
        if self.fail {
            return Err(RecordError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

/// Blob store keeping objects in a map; optionally fails every write.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    puts: AtomicUsize,
    fail: bool,
}

impl MemoryBlobStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_stream(&self, key: &str, mut body: BlobStream<'_>) -> BlobResult<StoredObject> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            data.extend_from_slice(&chunk.map_err(BlobError::Body)?);
        }
        if self.fail {
            return Err(BlobError::Backend("simulated outage".into()));
        }
        let stored = StoredObject {
            key: key.to_string(),
            size_bytes: data.len() as i64,
            etag: format!("{:x}", md5::compute(&data)),
        };
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(data));
        Ok(stored)
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn ping(&self) -> BlobResult<()> {
        if self.fail {
            return Err(BlobError::Backend("simulated outage".into()));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Single-chunk body stream.
pub fn body_of(data: Vec<u8>) -> BlobStream<'static> {
    Box::pin(stream::iter(vec![Ok::<_, io::Error>(Bytes::from(data))]))
}

/// Full router over the given stores, with a 1 MiB body limit.
pub fn test_app(
    records: Arc<MemoryRecordStore>,
    blobs: Arc<MemoryBlobStore>,
    settings: UploadSettings,
) -> Router {
    let service = UploadService::new(records, blobs, settings);
    build_app(service, 1024 * 1024, CorsLayer::permissive())
}

/// Multipart body with a single part named `field`.
pub fn multipart_body(field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(name) => format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `POST /upload` from `peer`, optionally carrying `X-Forwarded-For`.
pub fn upload_request(body: Vec<u8>, peer: &str, forwarded_for: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(value) = forwarded_for {
        builder = builder.header("x-forwarded-for", value);
    }
    let mut request = builder.body(Body::from(body)).unwrap();
    let peer = SocketAddr::new(peer.parse::<IpAddr>().unwrap(), 40000);
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

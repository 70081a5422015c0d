//! UploadService — coordinates the blob write and the metadata insert for a
//! validated upload.
//!
//! The bytes are written first under a freshly namespaced key, then the
//! metadata row is inserted in its own transaction. When the insert fails the
//! object is deleted again (unless orphan cleanup is disabled), so a rejected
//! upload leaves nothing behind in either system.

use crate::{
    models::upload::UploadRecord,
    services::{
        blob_store::{BlobError, BlobStore, BlobStream},
        record_store::{RecordError, RecordStore},
        validation::{ValidatedUpload, sanitize_key_component},
    },
};
use chrono::Utc;
use sqlx::types::ipnetwork::IpNetwork;
use std::{io, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file part in request")]
    MissingFile,
    #[error("file part has no usable filename")]
    InvalidFilename,
    #[error("extension `{0}` is not allowed")]
    DisallowedExtension(String),
    #[error("reading upload body: {0}")]
    Body(io::Error),
    #[error("filename `{0}` already exists")]
    DuplicateFilename(String),
    #[error("storage: {0}")]
    Storage(BlobError),
    #[error("database: {0}")]
    Database(RecordError),
}

impl From<BlobError> for UploadError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::Body(err) => UploadError::Body(err),
            other => UploadError::Storage(other),
        }
    }
}

impl From<RecordError> for UploadError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Duplicate(name) => UploadError::DuplicateFilename(name),
            other => UploadError::Database(other),
        }
    }
}

/// Tunables for [`UploadService`].
#[derive(Clone, Debug)]
pub struct UploadSettings {
    /// First path segment of every object key.
    pub key_prefix: String,
    /// Delete the stored object when its metadata insert fails.
    pub cleanup_orphans: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            key_prefix: "uploads".into(),
            cleanup_orphans: true,
        }
    }
}

/// Shared handler state owning both persistence capabilities.
#[derive(Clone)]
pub struct UploadService {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    settings: UploadSettings,
}

impl UploadService {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            records,
            blobs,
            settings,
        }
    }

    /// Namespaced object key: `{prefix}/{uuid}/{sanitized name}`.
    pub fn object_key(&self, original_name: &str) -> String {
        let prefix = self.settings.key_prefix.trim_matches('/');
        let name = sanitize_key_component(original_name);
        if prefix.is_empty() {
            format!("{}/{}", Uuid::new_v4(), name)
        } else {
            format!("{}/{}/{}", prefix, Uuid::new_v4(), name)
        }
    }

    /// Store `body` and record `upload`, exactly once.
    pub async fn persist(
        &self,
        upload: ValidatedUpload,
        body: BlobStream<'_>,
    ) -> Result<UploadRecord, UploadError> {
        let start = Instant::now();
        let key = self.object_key(&upload.original_name);
        debug!(key = %key, filename = %upload.filename, state = "validated", "upload accepted");

        let stored = self.blobs.put_stream(&key, body).await.map_err(|err| {
            match &err {
                BlobError::Body(e) => warn!(key = %key, error = %e, "upload body aborted"),
                other => error!(
                    key = %key,
                    backend = self.blobs.backend_name(),
                    error = %other,
                    "object store write failed"
                ),
            }
            UploadError::from(err)
        })?;
        debug!(key = %key, size_bytes = stored.size_bytes, etag = %stored.etag, state = "stored", "object stored");

        let record = UploadRecord {
            filename: upload.filename,
            user_ip: IpNetwork::from(upload.client_ip),
            extension: upload.extension,
            file_size: stored.size_bytes,
            object_key: stored.key,
            uploaded_at: Utc::now(),
        };

        match self.records.insert_unique(&record).await {
            Ok(row) => {
                info!(
                    filename = %row.filename,
                    key = %row.object_key,
                    user_ip = %row.user_ip,
                    size_bytes = row.file_size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    state = "committed",
                    "upload committed"
                );
                Ok(row)
            }
            Err(RecordError::Commit(err)) => {
                // The row may exist and point at this object, so it stays.
                error!(
                    filename = %record.filename,
                    key = %record.object_key,
                    error = %err,
                    state = "commit_unknown",
                    "commit outcome unknown, keeping stored object"
                );
                Err(RecordError::Commit(err).into())
            }
            Err(err) => {
                match &err {
                    RecordError::Duplicate(name) => {
                        info!(filename = %name, key = %record.object_key, state = "rolled_back", "duplicate filename rejected")
                    }
                    other => {
                        error!(filename = %record.filename, key = %record.object_key, error = %other, state = "rolled_back", "metadata insert failed")
                    }
                }
                self.compensate(&record.object_key).await;
                Err(err.into())
            }
        }
    }

    /// Remove an object whose metadata never committed.
    async fn compensate(&self, key: &str) {
        if !self.settings.cleanup_orphans {
            warn!(key = %key, "orphan cleanup disabled, object left in store");
            return;
        }
        match self.blobs.delete(key).await {
            Ok(()) => debug!(key = %key, "orphaned object removed"),
            Err(err) => error!(key = %key, error = %err, "failed to remove orphaned object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::disk_store::DiskBlobStore,
        test_support::{MemoryBlobStore, MemoryRecordStore, body_of},
    };
    use std::net::IpAddr;

    fn validated(name: &str) -> ValidatedUpload {
        crate::services::validation::validate_upload(name, "198.51.100.7".parse::<IpAddr>().unwrap())
            .unwrap()
    }

    fn service(
        records: &Arc<MemoryRecordStore>,
        blobs: &Arc<MemoryBlobStore>,
        cleanup_orphans: bool,
    ) -> UploadService {
        UploadService::new(
            records.clone(),
            blobs.clone(),
            UploadSettings {
                key_prefix: "uploads".into(),
                cleanup_orphans,
            },
        )
    }

    #[test]
    fn object_keys_are_namespaced_and_sanitized() {
        let svc = service(
            &Arc::new(MemoryRecordStore::default()),
            &Arc::new(MemoryBlobStore::default()),
            true,
        );

        let key = svc.object_key("../etc/pass wd.pdf");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "uploads");
        assert!(Uuid::parse_str(parts[1]).is_ok());
        assert_eq!(parts[2], "_etc_pass_wd.pdf");

        assert_ne!(svc.object_key("a.pdf"), svc.object_key("a.pdf"));
    }

    #[tokio::test]
    async fn persists_record_with_stored_size() {
        let records = Arc::new(MemoryRecordStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let svc = service(&records, &blobs, true);

        let row = svc
            .persist(validated("scan.PNG"), body_of(vec![0u8; 300]))
            .await
            .unwrap();

        assert_eq!(row.filename, "scan");
        assert_eq!(row.extension, ".png");
        assert_eq!(row.file_size, 300);
        assert_eq!(row.user_ip.to_string(), "198.51.100.7/32");
        assert_eq!(blobs.object(&row.object_key).unwrap().len(), 300);
        assert_eq!(records.get("scan"), Some(row));
    }

    #[tokio::test]
    async fn storage_failure_skips_database() {
        let records = Arc::new(MemoryRecordStore::default());
        let blobs = Arc::new(MemoryBlobStore::failing());
        let svc = service(&records, &blobs, true);

        let err = svc
            .persist(validated("scan.png"), body_of(b"data".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(records.insert_attempts(), 0);
        assert!(records.get("scan").is_none());
    }

    #[tokio::test]
    async fn database_failure_compensates_by_default() {
        let records = Arc::new(MemoryRecordStore::failing());
        let blobs = Arc::new(MemoryBlobStore::default());
        let svc = service(&records, &blobs, true);

        let err = svc
            .persist(validated("scan.png"), body_of(b"data".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Database(_)));
        assert_eq!(blobs.put_count(), 1);
        assert_eq!(blobs.len(), 0);
    }

    #[tokio::test]
    async fn database_failure_leaves_orphan_when_cleanup_disabled() {
        let records = Arc::new(MemoryRecordStore::failing());
        let blobs = Arc::new(MemoryBlobStore::default());
        let svc = service(&records, &blobs, false);

        svc.persist(validated("scan.png"), body_of(b"data".to_vec()))
            .await
            .unwrap_err();

        assert!(records.get("scan").is_none());
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn unknown_commit_outcome_keeps_object() {
        let records = Arc::new(MemoryRecordStore::failing_commit());
        let blobs = Arc::new(MemoryBlobStore::default());
        let svc = service(&records, &blobs, true);

        let err = svc
            .persist(validated("scan.png"), body_of(b"data".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Database(RecordError::Commit(_))));
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn long_filename_fits_disk_backend() {
        let dir = tempfile::tempdir().unwrap();
        let records = Arc::new(MemoryRecordStore::default());
        let svc = UploadService::new(
            records.clone(),
            Arc::new(DiskBlobStore::new(dir.path())),
            UploadSettings::default(),
        );
        let name = format!("{}.pdf", "a".repeat(300));

        let row = svc
            .persist(validated(&name), body_of(b"%PDF".to_vec()))
            .await
            .unwrap();

        assert_eq!(row.file_size, 4);
        assert!(row.object_key.ends_with(".pdf"));
        let on_disk = DiskBlobStore::new(dir.path()).object_path(&row.object_key);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"%PDF");
    }
}

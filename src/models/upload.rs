//! Represents an accepted upload and the object that backs it.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, types::ipnetwork::IpNetwork};

/// Metadata row written once per accepted upload.
///
/// `filename` is the natural key: the submitted name with its extension
/// removed. A second upload resolving to the same filename is rejected.
#[derive(Clone, FromRow, Debug, PartialEq)]
pub struct UploadRecord {
    /// Base name of the uploaded file, without extension.
    pub filename: String,

    /// Uploader address as a single-host network (`/32` or `/128`).
    #[sqlx(rename = "user-ip")]
    pub user_ip: IpNetwork,

    /// Lower-cased extension including the leading dot (e.g. `.pdf`).
    pub extension: String,

    /// Exact payload size in bytes.
    #[sqlx(rename = "file-size")]
    pub file_size: i64,

    /// Key of the object holding the payload.
    #[sqlx(rename = "object-key")]
    pub object_key: String,

    /// When the row was committed.
    #[sqlx(rename = "uploaded-at")]
    pub uploaded_at: DateTime<Utc>,
}

/// Result of a successful blob write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key the payload was written under.
    pub key: String,

    /// Number of bytes written.
    pub size_bytes: i64,

    /// Backend ETag, or the MD5 hex digest of the payload.
    pub etag: String,
}

use crate::services::upload_service::UploadError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: status, stable code and a client-safe message.
///
/// Internal details never reach the body; they are logged where the error
/// is converted.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "code": self.code,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::MissingFile => AppError::bad_request("missing_file", "No file part in request"),
            UploadError::InvalidFilename => {
                AppError::bad_request("invalid_filename", "File part has no usable filename")
            }
            UploadError::DisallowedExtension(ext) => AppError::bad_request(
                "disallowed_extension",
                format!("Extension '{ext}' is not allowed"),
            ),
            UploadError::Body(io_err) => {
                // Body errors from the multipart stream carry axum's own status (413 on limit).
                let status = io_err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<MultipartError>())
                    .map(MultipartError::status)
                    .unwrap_or(StatusCode::BAD_REQUEST);
                tracing::warn!(error = %io_err, status = status.as_u16(), "malformed upload body");
                AppError::new(status, "malformed_request", "Malformed upload body")
            }
            UploadError::DuplicateFilename(_) => AppError::new(
                StatusCode::CONFLICT,
                "duplicate_filename",
                "Duplicate filename found",
            ),
            UploadError::Storage(err) => {
                tracing::error!(error = %err, "upload failed in object store");
                AppError::internal("storage_error", "File storage failed")
            }
            UploadError::Database(err) => {
                tracing::error!(error = %err, "upload failed in database");
                AppError::internal("database_error", "Recording the upload failed")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        tracing::warn!(error = %err, status = status.as_u16(), "malformed multipart request");
        AppError::new(status, "malformed_request", "Malformed multipart request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{blob_store::BlobError, record_store::RecordError};
    use std::io;

    #[test]
    fn maps_upload_errors_to_statuses() {
        let cases = [
            (UploadError::MissingFile, StatusCode::BAD_REQUEST, "missing_file"),
            (UploadError::InvalidFilename, StatusCode::BAD_REQUEST, "invalid_filename"),
            (
                UploadError::DisallowedExtension(".exe".into()),
                StatusCode::BAD_REQUEST,
                "disallowed_extension",
            ),
            (
                UploadError::Body(io::Error::other("reset")),
                StatusCode::BAD_REQUEST,
                "malformed_request",
            ),
            (
                UploadError::DuplicateFilename("report".into()),
                StatusCode::CONFLICT,
                "duplicate_filename",
            ),
            (
                UploadError::Storage(BlobError::Backend("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
            ),
            (
                UploadError::Database(RecordError::Sqlx(sqlx::Error::PoolTimedOut)),
                StatusCode::INTERNAL_SERVER_ERROR,
                "database_error",
            ),
        ];

        for (err, status, code) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }

    #[test]
    fn database_detail_is_not_echoed() {
        let err = AppError::from(UploadError::Database(RecordError::Sqlx(
            sqlx::Error::Protocol("relation \"users\" does not exist".into()),
        )));
        assert!(!err.message.contains("users"));
    }

    #[test]
    fn names_rejected_extension() {
        let err = AppError::from(UploadError::DisallowedExtension(".exe".into()));
        assert_eq!(err.message, "Extension '.exe' is not allowed");
    }
}

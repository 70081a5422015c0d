//! Metadata persistence for accepted uploads.

use crate::models::upload::UploadRecord;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("filename `{0}` already exists")]
    Duplicate(String),
    /// COMMIT itself failed. The server may still have applied it, so the
    /// row's existence is unknown.
    #[error("commit outcome unknown: {0}")]
    Commit(sqlx::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `record` in its own transaction.
    ///
    /// A filename that already exists yields [`RecordError::Duplicate`] and
    /// leaves the existing row untouched. Any failure rolls back.
    async fn insert_unique(&self, record: &UploadRecord) -> RecordResult<UploadRecord>;

    /// Cheap connectivity probe used by the readiness endpoint.
    async fn ping(&self) -> RecordResult<()>;
}

/// Postgres-backed record store writing to the `users` table.
#[derive(Clone, Debug)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert_unique(&self, record: &UploadRecord) -> RecordResult<UploadRecord> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, UploadRecord>(
            r#"
            INSERT INTO users (filename, "user-ip", extension, "file-size", "object-key", "uploaded-at")
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING filename, "user-ip", extension, "file-size", "object-key", "uploaded-at"
            "#,
        )
        .bind(&record.filename)
        .bind(record.user_ip)
        .bind(&record.extension)
        .bind(record.file_size)
        .bind(&record.object_key)
        .bind(record.uploaded_at)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(row) => {
                tx.commit().await.map_err(RecordError::Commit)?;
                Ok(row)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, filename = %record.filename, "rollback failed");
                }
                if is_unique_violation(&err) {
                    Err(RecordError::Duplicate(record.filename.clone()))
                } else {
                    Err(RecordError::Sqlx(err))
                }
            }
        }
    }

    async fn ping(&self) -> RecordResult<()> {
        let value = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        if value != 1 {
            return Err(RecordError::Sqlx(sqlx::Error::Protocol(format!(
                "unexpected probe result: {value}"
            ))));
        }
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

//! Data models for the upload gateway.
//!
//! `UploadRecord` maps to the `users` table via `sqlx::FromRow`;
//! `StoredObject` describes what a blob backend wrote.

pub mod upload;

pub mod blob_store;
pub mod disk_store;
pub mod record_store;
pub mod s3_store;
pub mod upload_service;
pub mod validation;

//! HTTP handler for `POST /upload`.
//! Streams the `file` part straight into the blob store and delegates
//! persistence to `UploadService`.

use crate::{
    errors::AppError,
    services::{
        upload_service::{UploadError, UploadService},
        validation::{self, FILE_FIELD},
    },
};
use axum::{
    Json,
    extract::{ConnectInfo, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures::StreamExt;
use serde::Serialize;
use std::{io, net::SocketAddr};

#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
}

/// Accept a single-file multipart upload.
///
/// Only the first part named `file` is used; other parts are skipped.
pub async fn upload_file(
    State(service): State<UploadService>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = validation::resolve_client_ip(&headers, peer.ip());

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let submitted = field.file_name().unwrap_or_default().to_string();
        let upload = validation::validate_upload(&submitted, client_ip)?;

        let body = field.map(|chunk| chunk.map_err(io::Error::other));
        service.persist(upload, Box::pin(body)).await?;

        return Ok((
            StatusCode::OK,
            Json(UploadResponse {
                message: "File uploaded successfully",
            }),
        ));
    }

    Err(UploadError::MissingFile.into())
}

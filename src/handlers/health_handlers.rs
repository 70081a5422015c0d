//! Health & readiness handlers.
//!
//! - GET /health -> liveness, never touches dependencies
//! - GET /ready  -> readiness that probes the database and the blob store

use crate::services::upload_service::UploadService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /health`
///
/// Always 200 with `{"status":"ok"}`, whatever the state of the database or
/// object store.
pub async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /ready`
///
/// Runs both dependency probes and reports each one. HTTP 200 when all
/// pass, HTTP 503 otherwise.
pub async fn ready(State(service): State<UploadService>) -> impl IntoResponse {
    let database = match service.records.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => {
            tracing::warn!(error = %e, "readiness: database probe failed");
            CheckStatus::failed("database unreachable")
        }
    };
    let storage = match service.blobs.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => {
            tracing::warn!(
                backend = service.blobs.backend_name(),
                error = %e,
                "readiness: blob store probe failed"
            );
            CheckStatus::failed("blob store unreachable")
        }
    };

    let overall_ok = database.ok && storage.ok;

    let mut checks = HashMap::new();
    checks.insert("database", database);
    checks.insert("storage", storage);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

/// Per-dependency result. `error` is a fixed reason; details go to the log.
#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<&'static str>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: &'static str) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}

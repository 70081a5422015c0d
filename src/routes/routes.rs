//! Defines routes for the upload gateway.
//!
//! ## Structure
//! - `GET  /health` — liveness, no dependency checks
//! - `GET  /ready`  — readiness, probes database and blob store
//! - `POST /upload` — single-file multipart upload (field `file`)

use crate::{
    errors::AppError,
    handlers::{
        health_handlers::{health, ready},
        upload_handlers::upload_file,
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    trace::TraceLayer,
};

/// Build and return the router for all gateway routes.
///
/// The router carries shared state (`UploadService`) to all handlers.
pub fn routes() -> Router<UploadService> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/upload", post(upload_file))
}

/// Full application: routes, state and the HTTP layers around them.
pub fn build_app(service: UploadService, max_upload_bytes: usize, cors: CorsLayer) -> Router {
    routes()
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// CORS policy from a list of allowed origins; `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods(cors::Any)
            .allow_headers(cors::Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(cors::Any)
        .allow_headers(cors::Any)
}

/// Any panic inside a handler becomes a generic 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "handler panicked");
    AppError::internal("internal_error", "Internal server error").into_response()
}

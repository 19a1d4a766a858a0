//! Axum router construction and route mapping.
//!
//! The [`app`] function wires every gateway endpoint to its handler and
//! returns a ready-to-serve [`axum::Router`]. Routes map one-to-one onto
//! store operations; there is no query-parameter dispatch.

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::errors::generate_request_id;
use crate::handlers;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

// -- OpenAPI specification ----------------------------------------------------

/// OpenAPI documentation for the blobgate API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "blobgate",
        version = "0.1.0",
        description = "HTTP gateway for Azure Blob Storage"
    ),
    paths(
        health_check,
        handlers::blob::list_containers,
        handlers::blob::list_blobs,
        handlers::blob::upload,
        handlers::blob::upload_sample_files,
        handlers::blob::append,
        handlers::blob::download,
        handlers::blob::delete,
        handlers::blob::set_tier,
        handlers::blob::copy,
    ),
    components(schemas(
        crate::handlers::blob::ListContainersResponse,
        crate::handlers::blob::ListBlobsResponse,
        crate::handlers::blob::UploadResponse,
        crate::handlers::blob::CopyResponse,
        crate::handlers::blob::MessageResponse,
        crate::model::BlobDescriptor,
        crate::model::BlobKind,
        crate::model::AccessTier,
        crate::model::CopyStatus,
    )),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Blob", description = "Blob gateway operations"),
    )
)]
struct ApiDoc;

/// Build the axum [`Router`] with all gateway routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Infrastructure endpoints (not part of the blob API).
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_spec))
        // Blob gateway routes.
        .route("/blob/listcontainers", get(handlers::blob::list_containers))
        .route("/blob/listblobs", get(handlers::blob::list_blobs))
        .route("/blob/upload", post(handlers::blob::upload))
        .route(
            "/blob/upload-sample-files",
            post(handlers::blob::upload_sample_files),
        )
        .route("/blob/append/:name/:content", post(handlers::blob::append))
        .route("/blob/download/:name", get(handlers::blob::download))
        .route("/blob/delete/:name", delete(handlers::blob::delete))
        .route("/blob/settier/:name/:tier", put(handlers::blob::set_tier))
        .route("/blob/copy/:source/:dest", post(handlers::blob::copy))
        // Application state shared across all handlers.
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        // Uploads can be large; disable the default 2MB body limit.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `blobgate`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Only set x-request-id if not already present (error handler may set it).
    if !headers.contains_key("x-request-id") {
        let request_id = generate_request_id();
        headers.insert("x-request-id", HeaderValue::from_str(&request_id).unwrap());
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    // Always overwrite Date and Server to ensure consistency.
    headers.insert("date", HeaderValue::from_str(&date).unwrap());
    headers.insert("server", HeaderValue::from_static("blobgate"));

    response
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    operation_id = "HealthCheck",
    responses(
        (status = 200, description = "Health check OK")
    )
)]
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /openapi.json` -- Serve the OpenAPI document.
async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

// -- Tests -------------------------------------------------------------------

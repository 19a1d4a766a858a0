//! Prometheus metrics for blobgate.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "blobgate_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "blobgate_http_request_duration_seconds";

/// Total blob operations (counter). Labels: operation, status.
pub const BLOB_OPERATIONS_TOTAL: &str = "blobgate_blob_operations_total";

/// Total bytes received in request bodies (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "blobgate_bytes_received_total";

/// Total bytes sent in response bodies (counter).
pub const BYTES_SENT_TOTAL: &str = "blobgate_bytes_sent_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(BLOB_OPERATIONS_TOTAL, "Total blob operations by type");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Total bytes received (request bodies)");
    describe_counter!(BYTES_SENT_TOTAL, "Total bytes sent (response bodies)");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    // Do not instrument the metrics endpoint itself.
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// This prevents high-cardinality labels from unique blob names.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/blob/listblobs` -> `/blob/listblobs`
/// - `/blob/download/photo.jpg` -> `/blob/download/{name}`
/// - `/blob/settier/photo.jpg/Cool` -> `/blob/settier/{name}/{tier}`
/// - `/blob/copy/a/b` -> `/blob/copy/{source}/{dest}`
fn normalize_path(path: &str) -> String {
    match path {
        "/" | "/health" | "/metrics" | "/openapi.json" => return path.to_string(),
        "/blob/listcontainers" | "/blob/listblobs" | "/blob/upload"
        | "/blob/upload-sample-files" => return path.to_string(),
        _ => {}
    }

    let mut segments = path.trim_start_matches('/').split('/');
    if segments.next() != Some("blob") {
        return "/{other}".to_string();
    }
    match segments.next() {
        Some("download") => "/blob/download/{name}".to_string(),
        Some("delete") => "/blob/delete/{name}".to_string(),
        Some("append") => "/blob/append/{name}/{content}".to_string(),
        Some("settier") => "/blob/settier/{name}/{tier}".to_string(),
        Some("copy") => "/blob/copy/{source}/{dest}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> impl IntoResponse {
    let handle = PROMETHEUS_HANDLE
        .get()
        .expect("Prometheus recorder not initialized");
    let body = handle.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_fixed_routes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
        assert_eq!(normalize_path("/openapi.json"), "/openapi.json");
        assert_eq!(normalize_path("/blob/listblobs"), "/blob/listblobs");
        assert_eq!(
            normalize_path("/blob/upload-sample-files"),
            "/blob/upload-sample-files"
        );
    }

    #[test]
    fn test_normalize_path_blob_params() {
        assert_eq!(
            normalize_path("/blob/download/photo.jpg"),
            "/blob/download/{name}"
        );
        assert_eq!(
            normalize_path("/blob/delete/some/nested/name"),
            "/blob/delete/{name}"
        );
        assert_eq!(
            normalize_path("/blob/settier/photo.jpg/Cool"),
            "/blob/settier/{name}/{tier}"
        );
        assert_eq!(normalize_path("/blob/copy/a/b"), "/blob/copy/{source}/{dest}");
        assert_eq!(
            normalize_path("/blob/append/log.txt/hello"),
            "/blob/append/{name}/{content}"
        );
    }

    #[test]
    fn test_normalize_path_unknown() {
        assert_eq!(normalize_path("/unknown"), "/{other}");
        assert_eq!(normalize_path("/blob/unknown/x"), "/{other}");
    }
}

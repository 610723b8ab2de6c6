//! Axum Middleware for HTTP Request Tracing and Metrics

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::metrics;

static NUMERIC_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"/\d+(/|$)").ok());

/// Replace numeric path segments with a placeholder.
///
/// Keeps Prometheus label cardinality bounded.
fn normalize_path(path: &str) -> String {
    match NUMERIC_ID.as_ref() {
        Some(pattern) => pattern.replace_all(path, "/{id}$1").to_string(),
        None => path.to_string(),
    }
}

/// Observability middleware for Axum.
///
/// Wraps every request in a span, records Prometheus metrics, and logs
/// the completed request.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Some(metrics) = metrics() {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        );
    }

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

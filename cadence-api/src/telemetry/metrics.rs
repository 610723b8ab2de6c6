//! Prometheus Metrics Definitions
//!
//! Defines all Cadence metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use cadence_core::GovernanceError;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[0.025, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Remote call latency buckets (seconds)
const REMOTE_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<CadenceMetrics>> = Lazy::new(CadenceMetrics::new);

/// The registered metrics, if registration succeeded.
pub fn metrics() -> Option<&'static CadenceMetrics> {
    METRICS.as_ref().ok()
}

/// Container for all Cadence metrics.
#[derive(Clone)]
pub struct CadenceMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Physical remote calls - labels: kind, outcome
    pub remote_calls_total: CounterVec,

    /// Remote call duration histogram - labels: kind
    pub remote_call_duration_seconds: HistogramVec,

    /// Governed read cache lookups - labels: result (hit/miss)
    pub cache_lookups_total: CounterVec,

    /// Write intents skipped by the idempotency ledger
    pub write_dedupes_total: CounterVec,

    /// Calls rejected before reaching the provider - labels: reason
    pub governance_rejections_total: CounterVec,

    /// 1 while the 24-hour write cap lock is active
    pub write_locked: Gauge,
}

impl CadenceMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "cadence_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "cadence_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            remote_calls_total: register_counter_vec!(
                "cadence_remote_calls_total",
                "Physical calls made to remote APIs",
                &["kind", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register remote_calls_total: {}", e)))?,

            remote_call_duration_seconds: register_histogram_vec!(
                "cadence_remote_call_duration_seconds",
                "Remote call duration in seconds",
                &["kind"],
                REMOTE_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register remote_call_duration_seconds: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "cadence_cache_lookups_total",
                "Governed read cache lookups",
                &["result"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            write_dedupes_total: register_counter_vec!(
                "cadence_write_dedupes_total",
                "Write intents skipped because they already executed",
                &["operation"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register write_dedupes_total: {}", e)))?,

            governance_rejections_total: register_counter_vec!(
                "cadence_governance_rejections_total",
                "Calls rejected by the governance layer",
                &["reason"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register governance_rejections_total: {}", e)))?,

            write_locked: register_gauge!(
                "cadence_write_locked",
                "1 while the 24-hour write cap lock is active"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register write_locked: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record a physical remote call.
    pub fn record_remote_call(&self, kind: &str, status: Option<u16>, duration_secs: f64) {
        let outcome = match status {
            Some(s) if (200..300).contains(&s) => "ok",
            Some(429) => "rate_limited",
            Some(_) => "error",
            None => "transport_error",
        };
        self.remote_calls_total
            .with_label_values(&[kind, outcome])
            .inc();
        self.remote_call_duration_seconds
            .with_label_values(&[kind])
            .observe(duration_secs);
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    pub fn record_write_dedupe(&self, operation: &str) {
        self.write_dedupes_total.with_label_values(&[operation]).inc();
    }

    /// Count a governance error that stopped a call locally.
    pub fn record_rejection(&self, error: &GovernanceError) {
        let reason = match error {
            GovernanceError::QuotaExceeded { .. } => "quota_exceeded",
            GovernanceError::RateLimited { .. } => "rate_limited",
            GovernanceError::CircuitOpen { .. } => "circuit_open",
            GovernanceError::SchedulerClosed { .. } => "scheduler_closed",
            _ => return,
        };
        self.governance_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn set_write_locked(&self, locked: bool) {
        self.write_locked.set(if locked { 1.0 } else { 0.0 });
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

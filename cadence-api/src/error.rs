//! Error Types for Cadence API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - Conversions from the governance, storage and LLM error taxonomies
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Rejections that tell the caller to come back later carry `Retry-After`.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use cadence_core::{
    now_epoch_ms, CadenceError, ConfigError, GovernanceError, LimitScope, LlmError, StorageError,
    ValidationError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request carries no usable credential
    Unauthorized,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    ValidationFailed,
    InvalidInput,
    MissingField,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    NotFound,

    // ========================================================================
    // Throttling Errors (429)
    // ========================================================================
    /// Inbound request rate limit exceeded
    TooManyRequests,

    /// Provider quota reached (read window or 24-hour write cap)
    RateLimited,

    /// Local reservoir exhausted
    QuotaExceeded,

    /// Draft request over the token budget
    BudgetExceeded,

    // ========================================================================
    // Upstream Errors (502, 503, 504)
    // ========================================================================
    /// Remote API returned an error
    UpstreamError,

    /// Remote API returned something unparseable
    InvalidUpstreamResponse,

    /// Circuit breaker is failing fast
    CircuitOpen,

    ServiceUnavailable,

    Timeout,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    InternalError,

    StorageError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,

            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::MissingField => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::NotFound => StatusCode::NOT_FOUND,

            ErrorCode::TooManyRequests
            | ErrorCode::RateLimited
            | ErrorCode::QuotaExceeded
            | ErrorCode::BudgetExceeded => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::UpstreamError | ErrorCode::InvalidUpstreamResponse => {
                StatusCode::BAD_GATEWAY
            }

            ErrorCode::CircuitOpen | ErrorCode::ServiceUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,

            ErrorCode::InternalError | ErrorCode::StorageError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "NotAuthenticated",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::NotFound => "Not found",
            ErrorCode::TooManyRequests => "Rate limit exceeded",
            ErrorCode::RateLimited => "Provider rate limit reached",
            ErrorCode::QuotaExceeded => "Local call quota exhausted",
            ErrorCode::BudgetExceeded => "Daily token budget exceeded",
            ErrorCode::UpstreamError => "Upstream request failed",
            ErrorCode::InvalidUpstreamResponse => "Invalid response from upstream",
            ErrorCode::CircuitOpen => "Upstream temporarily unavailable",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StorageError => "Storage operation failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (rate-limit state, field errors, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Sent as the `Retry-After` header, never in the body.
    #[serde(skip)]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            retry_after_secs: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_secs = Some(retry_after_ms.div_ceil(1000).max(1));
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized() -> Self {
        Self::from_code(ErrorCode::Unauthorized)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("{} required", field))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        let mut error = Self::new(
            ErrorCode::TooManyRequests,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after_secs),
        );
        error.retry_after_secs = Some(retry_after_secs.max(1));
        error
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

fn epoch_seconds_to_iso(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}

fn rate_limit_message(scope: LimitScope) -> &'static str {
    match scope {
        LimitScope::Read => "Read rate limit reached on X, reads paused until reset.",
        LimitScope::UserDaily => "Daily posting limit reached on X for this account.",
    }
}

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::NotAuthenticated => ApiError::unauthorized(),
            GovernanceError::QuotaExceeded {
                scheduler,
                retry_after_ms,
            } => ApiError::from_code(ErrorCode::QuotaExceeded)
                .with_details(json!({
                    "scheduler": scheduler,
                    "retry_after_ms": retry_after_ms,
                }))
                .with_retry_after_ms(retry_after_ms),
            GovernanceError::RateLimited {
                scope,
                remaining,
                reset_epoch,
                locked_until_ms,
            } => {
                let wait_ms = (locked_until_ms - now_epoch_ms()).max(0) as u64;
                ApiError::new(ErrorCode::RateLimited, rate_limit_message(scope))
                    .with_details(json!({
                        "rate_limited": true,
                        "scope": scope,
                        "remaining": remaining,
                        "reset_epoch": reset_epoch,
                        "reset_iso": reset_epoch.and_then(epoch_seconds_to_iso),
                        "locked_until_ms": locked_until_ms,
                    }))
                    .with_retry_after_ms(wait_ms)
            }
            GovernanceError::CircuitOpen {
                operation,
                retry_after_ms,
            } => ApiError::from_code(ErrorCode::CircuitOpen)
                .with_details(json!({
                    "operation": operation,
                    "retry_after_ms": retry_after_ms,
                }))
                .with_retry_after_ms(retry_after_ms),
            GovernanceError::Upstream { status, message } => {
                ApiError::new(ErrorCode::UpstreamError, message)
                    .with_details(json!({ "upstream_status": status }))
            }
            GovernanceError::Timeout {
                operation,
                timeout_ms,
            } => ApiError::new(
                ErrorCode::Timeout,
                format!("Operation '{}' timed out after {}ms", operation, timeout_ms),
            ),
            GovernanceError::SchedulerClosed { scheduler } => ApiError::service_unavailable(
                format!("Scheduler '{}' is shutting down", scheduler),
            ),
            GovernanceError::TaskAborted { reason } => {
                tracing::error!(reason = %reason, "Governed task aborted");
                ApiError::internal_error("Governed call aborted")
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        // Log the full error, return a generic one
        tracing::error!(error = %err, "Storage error");
        ApiError::from_code(ErrorCode::StorageError)
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ProviderNotConfigured => {
                ApiError::service_unavailable("Draft generation is not configured")
            }
            LlmError::BudgetExceeded { requested, budget } => {
                ApiError::from_code(ErrorCode::BudgetExceeded)
                    .with_details(json!({ "requested": requested, "budget": budget }))
            }
            LlmError::RateLimited {
                provider,
                retry_after_ms,
            } => ApiError::new(
                ErrorCode::RateLimited,
                format!("{} rate limit reached", provider),
            )
            .with_retry_after_ms(retry_after_ms.max(0) as u64),
            LlmError::InvalidResponse { provider, reason } => {
                tracing::warn!(provider = %provider, reason = %reason, "Invalid model response");
                ApiError::new(
                    ErrorCode::InvalidUpstreamResponse,
                    format!("Invalid JSON from {}", provider),
                )
            }
            LlmError::RequestFailed {
                provider,
                status,
                message,
            } => ApiError::new(ErrorCode::UpstreamError, message)
                .with_details(json!({ "provider": provider, "upstream_status": status })),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(&field),
            ValidationError::InvalidValue { field, reason } => ApiError::new(
                ErrorCode::ValidationFailed,
                format!("{}: {}", field, reason),
            ),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

impl From<CadenceError> for ApiError {
    fn from(err: CadenceError) -> Self {
        match err {
            CadenceError::Governance(e) => e.into(),
            CadenceError::Storage(e) => e.into(),
            CadenceError::Llm(e) => e.into(),
            CadenceError::Validation(e) => e.into(),
            CadenceError::Config(e) => e.into(),
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

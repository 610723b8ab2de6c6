//! Draft provider implementations

pub mod xai;

use cadence_core::{CadenceError, LlmError};

pub(crate) fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> CadenceError {
    CadenceError::Llm(LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    })
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> CadenceError {
    CadenceError::Llm(LlmError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    })
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> CadenceError {
    CadenceError::Llm(LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}

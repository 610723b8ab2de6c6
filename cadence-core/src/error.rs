//! Error types for Cadence operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which quota a rate-limit rejection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitScope {
    /// Provider window limit on read endpoints.
    Read,
    /// Provider 24-hour per-user write cap.
    #[serde(rename = "user-24h")]
    UserDaily,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Read => "read",
            LimitScope::UserDaily => "user-24h",
        }
    }
}

impl std::fmt::Display for LimitScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call-governance errors.
///
/// Every variant is `Clone` so a single coalesced outcome can be handed to
/// every waiter unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("No valid credential context")]
    NotAuthenticated,

    #[error("Local {scheduler} reservoir exhausted, retry after {retry_after_ms}ms")]
    QuotaExceeded {
        scheduler: String,
        retry_after_ms: u64,
    },

    #[error("Rate limited ({scope}), locked until {locked_until_ms}")]
    RateLimited {
        scope: LimitScope,
        remaining: Option<i64>,
        reset_epoch: Option<i64>,
        locked_until_ms: i64,
    },

    #[error("Circuit open for {operation}, retry after {retry_after_ms}ms")]
    CircuitOpen {
        operation: String,
        retry_after_ms: u64,
    },

    #[error("Upstream call failed with status {status:?}: {message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("Remote call {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Scheduler {scheduler} is shut down")]
    SchedulerClosed { scheduler: String },

    #[error("In-flight task aborted: {reason}")]
    TaskAborted { reason: String },
}

impl GovernanceError {
    /// Whether this outcome counts against a circuit breaker's error rate.
    ///
    /// Only dependency faults count. Rejections produced locally, and
    /// provider rate limits (handled by lockouts), do not.
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            GovernanceError::Upstream { .. } | GovernanceError::Timeout { .. }
        )
    }

    /// Milliseconds the caller should wait before retrying, when known.
    pub fn retry_after_ms(&self, now_ms: i64) -> Option<u64> {
        match self {
            GovernanceError::QuotaExceeded { retry_after_ms, .. }
            | GovernanceError::CircuitOpen { retry_after_ms, .. } => Some(*retry_after_ms),
            GovernanceError::RateLimited {
                locked_until_ms, ..
            } => Some(locked_until_ms.saturating_sub(now_ms).max(0) as u64),
            _ => None,
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open {backend} store: {reason}")]
    OpenFailed { backend: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Draft-generation provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No LLM provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Daily token budget exceeded: {requested} > {budget}")]
    BudgetExceeded { requested: i64, budget: i64 },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Cadence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CadenceError {
    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CadenceError {
    /// Borrow the governance error, if this is one.
    pub fn as_governance(&self) -> Option<&GovernanceError> {
        match self {
            CadenceError::Governance(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_dependency_failure(&self) -> bool {
        self.as_governance()
            .map(GovernanceError::is_dependency_failure)
            .unwrap_or(false)
    }
}

/// Result type alias for Cadence operations.
pub type CadenceResult<T> = Result<T, CadenceError>;

// =============================================================================
// TESTS
// =============================================================================

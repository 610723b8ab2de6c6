//! Status surface types
//!
//! Read-only snapshots of governance state for operators and UIs. Building
//! a snapshot never blocks on a remote call.

use crate::EpochMillis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// CIRCUIT STATE
// ============================================================================

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed = 0,
    /// Circuit is open, requests are rejected
    Open = 1,
    /// Circuit is half-open, a single probe is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// WRITE CAP
// ============================================================================

/// Process-wide record of the provider's 24-hour write quota.
///
/// `locked_until_ms` never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCapStatus {
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset_epoch: Option<i64>,
    pub locked_until_ms: EpochMillis,
    pub updated_at_ms: Option<EpochMillis>,
}

impl WriteCapStatus {
    pub fn is_locked_at(&self, now_ms: EpochMillis) -> bool {
        now_ms < self.locked_until_ms
    }

    pub fn snapshot(&self, now_ms: EpochMillis) -> WriteCapSnapshot {
        WriteCapSnapshot {
            locked: self.is_locked_at(now_ms),
            remaining: self.remaining,
            limit: self.limit,
            reset_epoch: self.reset_epoch,
            reset_iso: self.reset_epoch.and_then(epoch_seconds_to_iso),
            locked_until_ms: self.locked_until_ms,
            updated_at: self.updated_at_ms.and_then(epoch_millis_to_iso),
            now: now_ms,
        }
    }
}

/// Operator view of the write cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteCapSnapshot {
    pub locked: bool,
    pub remaining: Option<i64>,
    pub limit: Option<i64>,
    pub reset_epoch: Option<i64>,
    pub reset_iso: Option<String>,
    pub locked_until_ms: EpochMillis,
    pub updated_at: Option<String>,
    pub now: EpochMillis,
}

/// Operator view of the read lockout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadLockSnapshot {
    pub locked: bool,
    pub lock_until_ms: EpochMillis,
    pub now: EpochMillis,
}

// ============================================================================
// SCHEDULERS / BREAKERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirSnapshot {
    pub name: String,
    pub capacity: u32,
    pub remaining: u32,
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
    /// Milliseconds until the reservoir next refills.
    pub next_refill_in_ms: u64,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub operation: String,
    pub state: CircuitState,
    pub calls_in_window: usize,
    pub failures_in_window: usize,
    /// Remaining open time, when the circuit is open.
    pub retry_after_ms: Option<u64>,
}

impl BreakerSnapshot {
    pub fn error_rate_pct(&self) -> f64 {
        if self.calls_in_window == 0 {
            0.0
        } else {
            self.failures_in_window as f64 * 100.0 / self.calls_in_window as f64
        }
    }
}

// ============================================================================
// HEALTH
// ============================================================================

/// Health status for a service or component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Operational, with reduced guarantees
    Degraded,
    Unhealthy,
}

/// Health of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    pub message: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            metadata: None,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

fn epoch_seconds_to_iso(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.to_rfc3339())
}

fn epoch_millis_to_iso(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_state_from_u8() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        assert_eq!(CircuitState::HalfOpen as u8, 2);
    }

    #[test]
    fn test_write_cap_snapshot() {
        let status = WriteCapStatus {
            remaining: Some(0),
            limit: Some(17),
            reset_epoch: Some(1_700_000_000),
            locked_until_ms: 1_700_000_001_000,
            updated_at_ms: Some(1_699_999_000_000),
        };
        let snap = status.snapshot(1_700_000_000_500);
        assert!(snap.locked);
        assert_eq!(snap.reset_iso.as_deref(), Some("2023-11-14T22:13:20+00:00"));
        assert!(snap.updated_at.is_some());

        let later = status.snapshot(1_700_000_001_000);
        assert!(!later.locked);
    }

    #[test]
    fn test_default_status_is_unlocked() {
        let status = WriteCapStatus::default();
        assert!(!status.is_locked_at(0));
        let snap = status.snapshot(10);
        assert_eq!(snap.reset_iso, None);
        assert_eq!(snap.updated_at, None);
    }

    #[test]
    fn test_breaker_error_rate() {
        let snap = BreakerSnapshot {
            operation: "resolve".to_string(),
            state: CircuitState::Closed,
            calls_in_window: 4,
            failures_in_window: 1,
            retry_after_ms: None,
        };
        assert!((snap.error_rate_pct() - 25.0).abs() < f64::EPSILON);
    }
}

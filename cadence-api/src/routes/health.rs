//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Governance component check
//!
//! No authentication required for health endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use cadence_core::{CircuitState, HealthCheck, HealthStatus};
use cadence_guard::Governor;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub components: Vec<HealthCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping - Simple pong response
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        components: Vec::new(),
        version: None,
        uptime_seconds: None,
    };
    (StatusCode::OK, Json(response))
}

/// Component checks for the governance layer.
pub fn governance_checks(governor: &Governor) -> Vec<HealthCheck> {
    let mut checks = Vec::new();

    for scheduler in governor.scheduler_snapshots() {
        let component = format!("scheduler:{}", scheduler.name);
        let check = if scheduler.closed {
            HealthCheck::unhealthy(component, "Scheduler is closed")
        } else {
            HealthCheck::healthy(component)
        };
        checks.push(check.with_metadata("remaining", scheduler.remaining.into()));
    }

    let open: Vec<String> = governor
        .breaker_snapshots()
        .into_iter()
        .filter(|b| b.state != CircuitState::Closed)
        .map(|b| b.operation)
        .collect();
    checks.push(if open.is_empty() {
        HealthCheck::healthy("breakers")
    } else {
        HealthCheck::degraded("breakers", format!("Circuit not closed: {}", open.join(", ")))
    });

    let backend = governor.ledger_backend();
    checks.push(if backend.is_durable() {
        HealthCheck::healthy("ledger")
    } else {
        HealthCheck::degraded("ledger", "Idempotency ledger is not durable")
    });

    if governor.write_cap().is_locked() {
        checks.push(HealthCheck::degraded("write_cap", "Writes locked until quota reset"));
    }

    checks
}

/// Worst status across all checks.
pub fn overall_status(checks: &[HealthCheck]) -> HealthStatus {
    if checks.iter().any(|c| c.status == HealthStatus::Unhealthy) {
        HealthStatus::Unhealthy
    } else if checks.iter().any(|c| c.status == HealthStatus::Degraded) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// GET /health/ready - Readiness check
///
/// Degraded components still report ready; only a closed scheduler fails.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let components = governance_checks(&state.governor);
    let status = overall_status(&components);

    let response = HealthResponse {
        status: status.clone(),
        message: None,
        components,
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
        uptime_seconds: Some(state.start_time.elapsed().as_secs()),
    };

    let status_code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create health check router (no auth required)
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::GovernanceConfig;

    #[test]
    fn test_health_response_serialization() -> Result<(), serde_json::Error> {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            message: Some("All systems operational".to_string()),
            components: Vec::new(),
            version: None,
            uptime_seconds: None,
        };

        let json = serde_json::to_string(&response)?;
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(!json.contains("components"));
        Ok(())
    }

    #[test]
    fn test_overall_status_takes_worst() {
        let healthy = HealthCheck::healthy("a");
        let degraded = HealthCheck::degraded("b", "slow");
        let unhealthy = HealthCheck::unhealthy("c", "down");

        assert_eq!(overall_status(&[healthy.clone()]), HealthStatus::Healthy);
        assert_eq!(
            overall_status(&[healthy.clone(), degraded.clone()]),
            HealthStatus::Degraded
        );
        assert_eq!(
            overall_status(&[healthy, degraded, unhealthy]),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_memory_ledger_is_degraded() {
        let mut config = GovernanceConfig::default();
        config.ledger.path = None;
        let governor = Governor::from_config(&config);

        let checks = governance_checks(&governor);
        assert_eq!(overall_status(&checks), HealthStatus::Degraded);
        assert!(checks
            .iter()
            .any(|c| c.component == "ledger" && c.status == HealthStatus::Degraded));
    }

    #[tokio::test]
    async fn test_shutdown_is_unhealthy() {
        let mut config = GovernanceConfig::default();
        config.ledger.path = None;
        let governor = Governor::from_config(&config);
        governor.shutdown();

        let checks = governance_checks(&governor);
        assert_eq!(overall_status(&checks), HealthStatus::Unhealthy);
    }
}

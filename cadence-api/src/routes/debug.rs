//! Operator status endpoints.
//!
//! Read-only views of the governance state. These never trigger a remote
//! call and carry no credential.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use cadence_core::{ReadLockSnapshot, WriteCapSnapshot};
use cadence_guard::Governor;
use serde_json::{json, Value};

use crate::state::AppState;
use crate::telemetry::metrics;

/// GET /debug/reads
pub async fn reads(State(governor): State<Arc<Governor>>) -> Json<ReadLockSnapshot> {
    Json(governor.read_lock_snapshot())
}

/// GET /debug/writes
pub async fn writes(State(governor): State<Arc<Governor>>) -> Json<WriteCapSnapshot> {
    let snapshot = governor.write_cap_snapshot();
    if let Some(metrics) = metrics() {
        metrics.set_write_locked(snapshot.locked);
    }
    Json(snapshot)
}

/// GET /debug/schedulers
pub async fn schedulers(State(governor): State<Arc<Governor>>) -> Json<Value> {
    Json(json!({
        "schedulers": governor.scheduler_snapshots(),
        "breakers": governor.breaker_snapshots(),
        "cache": governor.cache_stats(),
        "ledger": governor.ledger_backend(),
    }))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/reads", get(reads))
        .route("/writes", get(writes))
        .route("/schedulers", get(schedulers))
}

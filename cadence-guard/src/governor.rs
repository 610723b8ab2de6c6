//! Composition of the governance components into read and write paths.
//!
//! Read: read lockout, cache, coalescer, read scheduler, breaker, remote
//! call, cache fill.
//!
//! Write: write-cap check, ledger reservation, coalescer, write scheduler,
//! write-cap recheck, remote call (no breaker), write-cap observation.

use std::future::Future;
use std::sync::Arc;

use cadence_core::{
    idempotency_key, BreakerSnapshot, CadenceResult, GovernanceConfig, GovernanceError,
    ReadLockSnapshot, ReservoirSnapshot, WriteCapSnapshot,
};
use cadence_storage::{open_ledger, CacheStats, IdempotencyLedger, LedgerBackend, TtlCache};
use serde_json::Value;

use crate::breaker::BreakerRegistry;
use crate::call_log::CallLog;
use crate::coalescer::Coalescer;
use crate::remote::{RemoteResponse, RemoteResult};
use crate::scheduler::QuotaScheduler;
use crate::write_cap::{ReadLockout, WriteCapGate};

/// Result of a governed read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutcome {
    pub value: Value,
    /// Served from the cache without a remote call.
    pub cached: bool,
}

/// Result of a governed write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Posted {
        key: String,
        response: RemoteResponse,
    },
    /// The same intent was already executed; no remote call was made.
    Deduped { key: String },
}

impl WriteOutcome {
    pub fn is_deduped(&self) -> bool {
        matches!(self, WriteOutcome::Deduped { .. })
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOutcome::Posted { key, .. } | WriteOutcome::Deduped { key } => key,
        }
    }
}

/// Process-wide governance state.
pub struct Governor {
    cache: Arc<TtlCache<Value>>,
    ledger: Arc<dyn IdempotencyLedger>,
    breakers: BreakerRegistry,
    reads: Arc<QuotaScheduler>,
    writes: Arc<QuotaScheduler>,
    write_cap: Arc<WriteCapGate>,
    read_lock: Arc<ReadLockout>,
    read_flights: Coalescer<Value>,
    write_flights: Coalescer<RemoteResponse>,
    call_log: Arc<CallLog>,
}

impl Governor {
    pub fn new(config: &GovernanceConfig, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        Self {
            cache: Arc::new(TtlCache::from_settings(&config.cache)),
            ledger,
            breakers: BreakerRegistry::new(config.breaker.clone()),
            reads: Arc::new(QuotaScheduler::new("reads", config.reads.clone())),
            writes: Arc::new(QuotaScheduler::new("writes", config.writes.clone())),
            write_cap: Arc::new(WriteCapGate::new(config.write_cap_safety_margin_ms)),
            read_lock: Arc::new(ReadLockout::new()),
            read_flights: Coalescer::new("reads"),
            write_flights: Coalescer::new("writes"),
            call_log: Arc::new(CallLog::default()),
        }
    }

    /// Build with the ledger selected by `config.ledger`.
    pub fn from_config(config: &GovernanceConfig) -> Self {
        Self::new(config, open_ledger(&config.ledger))
    }

    pub fn with_call_log(mut self, enabled: bool) -> Self {
        self.call_log = Arc::new(CallLog::new(enabled));
        self
    }

    /// Governed read of `kind`, cached under `cache_key`.
    pub async fn read<F, Fut>(
        &self,
        kind: &str,
        cache_key: &str,
        op: F,
    ) -> Result<ReadOutcome, GovernanceError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RemoteResult> + Send + 'static,
    {
        self.read_lock.check()?;

        if let Some(value) = self.cache.get(cache_key) {
            tracing::debug!(kind, cache_key, "Cache hit");
            return Ok(ReadOutcome {
                value,
                cached: true,
            });
        }

        let scheduler = Arc::clone(&self.reads);
        let breaker = self.breakers.get(kind);
        let cache = Arc::clone(&self.cache);
        let read_lock = Arc::clone(&self.read_lock);
        let call_log = Arc::clone(&self.call_log);
        let key = cache_key.to_string();
        let kind = kind.to_string();

        let task = async move {
            let value = scheduler
                .schedule(|| {
                    breaker.call(|| async {
                        let call_id = call_log.start(&kind, &key);
                        match op().await {
                            Ok(response) => {
                                call_log.finish(call_id, "ok", Some(response.status));
                                Ok(response.body)
                            }
                            Err(failure) => {
                                call_log.finish(call_id, "error", failure.status);
                                if failure.is_rate_limited() {
                                    read_lock.observe_rate_limited(&failure.headers);
                                    Err(read_lock.rate_limited())
                                } else {
                                    Err(failure.into_upstream())
                                }
                            }
                        }
                    })
                })
                .await?;
            cache.set(key, value.clone());
            Ok::<_, GovernanceError>(value)
        };

        let value = self.read_flights.once(cache_key, || task).await?;
        Ok(ReadOutcome {
            value,
            cached: false,
        })
    }

    /// Governed write of `content` to `target_id`, executed at most once per
    /// idempotency key.
    pub async fn write<F, Fut>(
        &self,
        target_id: &str,
        content: &str,
        op: F,
    ) -> CadenceResult<WriteOutcome>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = RemoteResult> + Send + 'static,
    {
        self.write_cap.check()?;

        let key = idempotency_key(target_id, content);
        if !self.ledger.try_reserve(&key).await? {
            tracing::info!(key = %key, target_id, "Duplicate write intent, skipping remote call");
            return Ok(WriteOutcome::Deduped { key });
        }

        let scheduler = Arc::clone(&self.writes);
        let gate = Arc::clone(&self.write_cap);
        let call_log = Arc::clone(&self.call_log);
        let target = target_id.to_string();

        let task = async move {
            scheduler
                .schedule(|| async {
                    // the gate may have locked while this write was queued
                    gate.check()?;
                    let call_id = call_log.start("post_reply", &target);
                    match op().await {
                        Ok(response) => {
                            gate.observe(&response.headers);
                            call_log.finish(call_id, "ok", Some(response.status));
                            Ok(response)
                        }
                        Err(failure) => {
                            gate.observe(&failure.headers);
                            call_log.finish(call_id, "error", failure.status);
                            if failure.is_rate_limited() {
                                Err(gate.rate_limited())
                            } else {
                                Err(failure.into_upstream())
                            }
                        }
                    }
                })
                .await
        };

        let response = self.write_flights.once(&key, || task).await?;
        tracing::info!(key = %key, target_id, "Write executed");
        Ok(WriteOutcome::Posted { key, response })
    }

    pub fn write_cap_snapshot(&self) -> WriteCapSnapshot {
        self.write_cap.snapshot()
    }

    pub fn read_lock_snapshot(&self) -> ReadLockSnapshot {
        self.read_lock.snapshot()
    }

    pub fn scheduler_snapshots(&self) -> Vec<ReservoirSnapshot> {
        vec![self.reads.snapshot(), self.writes.snapshot()]
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn ledger_backend(&self) -> LedgerBackend {
        self.ledger.backend()
    }

    pub fn ledger(&self) -> &Arc<dyn IdempotencyLedger> {
        &self.ledger
    }

    pub fn write_cap(&self) -> &WriteCapGate {
        &self.write_cap
    }

    pub fn read_lockout(&self) -> &ReadLockout {
        &self.read_lock
    }

    /// Stop both schedulers. Queued callers fail with `SchedulerClosed`.
    pub fn shutdown(&self) {
        self.reads.shutdown();
        self.writes.shutdown();
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .field("ledger", &self.ledger.backend())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteFailure;
    use cadence_core::{CadenceError, HeaderSnapshot, LimitScope};
    use cadence_storage::MemoryLedger;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn governor() -> Governor {
        let mut config = GovernanceConfig::default();
        config.reads.min_spacing = Duration::ZERO;
        config.writes.min_spacing = Duration::ZERO;
        Governor::new(&config, Arc::new(MemoryLedger::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_fills_cache() {
        let gov = governor();
        let calls = Arc::new(AtomicUsize::new(0));

        for expected_cached in [false, true] {
            let calls = Arc::clone(&calls);
            let outcome = gov
                .read("resolve", "resolve:@jack", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RemoteResponse::ok(json!({"id": "12"})))
                })
                .await
                .expect("read");
            assert_eq!(outcome.value, json!({"id": "12"}));
            assert_eq!(outcome.cached, expected_cached);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_is_not_cached() {
        let gov = governor();
        let first = gov
            .read("search", "search:#rust", || async {
                Err(RemoteFailure::new(503, "unavailable"))
            })
            .await;
        assert!(matches!(first, Err(GovernanceError::Upstream { .. })));

        let second = gov
            .read("search", "search:#rust", || async {
                Ok(RemoteResponse::ok(json!([])))
            })
            .await
            .expect("read");
        assert!(!second.cached);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_read_sets_lockout() {
        let gov = governor();
        let reset = cadence_core::now_epoch_ms() / 1_000 + 600;
        let result = gov
            .read("resolve", "resolve:@a", move || async move {
                Err(RemoteFailure::new(429, "Too Many Requests").with_headers(
                    HeaderSnapshot::new().with("x-rate-limit-reset", reset.to_string()),
                ))
            })
            .await;
        assert!(matches!(
            result,
            Err(GovernanceError::RateLimited {
                scope: LimitScope::Read,
                ..
            })
        ));

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let blocked = gov
            .read("resolve", "resolve:@b", move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(RemoteResponse::ok(json!({})))
            })
            .await;
        assert!(matches!(blocked, Err(GovernanceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(gov.read_lock_snapshot().locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_dedupes_same_intent() {
        let gov = governor();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            outcomes.push(
                gov.write("123", "nice", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(RemoteResponse::ok(json!({"id": "999"})))
                })
                .await
                .expect("write"),
            );
        }
        assert!(!outcomes[0].is_deduped());
        assert!(outcomes[1].is_deduped());
        assert_eq!(outcomes[0].key(), outcomes[1].key());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_cap_observed_on_failure_and_blocks_next_write() {
        let gov = governor();
        let reset = cadence_core::now_epoch_ms() / 1_000 + 3_600;
        let result = gov
            .write("123", "first", move || async move {
                Err(RemoteFailure::new(429, "Too Many Requests").with_headers(
                    HeaderSnapshot::new()
                        .with("x-user-limit-24hour-remaining", "0")
                        .with("x-user-limit-24hour-reset", reset.to_string()),
                ))
            })
            .await;
        match result {
            Err(CadenceError::Governance(GovernanceError::RateLimited {
                scope,
                remaining,
                reset_epoch,
                ..
            })) => {
                assert_eq!(scope, LimitScope::UserDaily);
                assert_eq!(remaining, Some(0));
                assert_eq!(reset_epoch, Some(reset));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let blocked = gov
            .write("123", "second", move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(RemoteResponse::ok(json!({})))
            })
            .await;
        assert!(matches!(
            blocked,
            Err(CadenceError::Governance(GovernanceError::RateLimited { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // a locked gate does not burn the idempotency key
        let key = idempotency_key("123", "second");
        assert!(!gov.ledger().contains(&key).await.expect("contains"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_success_headers_update_status() {
        let gov = governor();
        gov.write("55", "hello", || async {
            Ok(RemoteResponse::ok(json!({"id": "1"})).with_headers(
                HeaderSnapshot::new().with("X-User-Limit-24Hour-Remaining", "16"),
            ))
        })
        .await
        .expect("write");
        let snap = gov.write_cap_snapshot();
        assert_eq!(snap.remaining, Some(16));
        assert!(!snap.locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_schedulers() {
        let gov = governor();
        gov.shutdown();
        let result = gov
            .read("resolve", "resolve:@x", || async { Ok(RemoteResponse::ok(json!({}))) })
            .await;
        assert!(matches!(result, Err(GovernanceError::SchedulerClosed { .. })));
        assert!(gov.scheduler_snapshots().iter().all(|s| s.closed));
    }
}

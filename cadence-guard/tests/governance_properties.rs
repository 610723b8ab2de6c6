//! Behavioral properties of the governance layer, end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::{
    now_epoch_ms, CircuitState, GovernanceConfig, GovernanceError, HeaderSnapshot, LimitScope,
    ReservoirConfig,
};
use cadence_guard::{
    CircuitBreaker, Coalescer, Governor, QuotaScheduler, RemoteFailure, RemoteResponse,
    WriteCapGate,
};
use cadence_storage::{IdempotencyLedger, LmdbLedger, MemoryLedger};
use cadence_test_utils::assertions::{
    assert_cadence_rate_limited, assert_circuit_open, assert_upstream,
};
use cadence_test_utils::fixtures;
use cadence_test_utils::generators::arb_header_value;
use proptest::prelude::*;
use serde_json::json;
use tokio::time::Instant;

fn reservoir(capacity: u32, window_ms: u64, max_concurrent: usize) -> ReservoirConfig {
    ReservoirConfig {
        capacity,
        refill_interval: Duration::from_millis(window_ms),
        max_concurrent,
        min_spacing: Duration::ZERO,
        max_wait: None,
    }
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime")
}

#[tokio::test(start_paused = true)]
async fn three_reads_with_capacity_two_wait_for_the_next_window() {
    let scheduler = Arc::new(QuotaScheduler::new("reads", reservoir(2, 1_000, 8)));
    let t0 = Instant::now();

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .schedule(|| async { Ok(Instant::now()) })
                    .await
            })
        })
        .collect();

    let mut starts = Vec::new();
    for handle in handles {
        starts.push(handle.await.expect("join").expect("admitted") - t0);
    }
    starts.sort();

    assert_eq!(starts[0], Duration::ZERO);
    assert_eq!(starts[1], Duration::ZERO);
    assert!(starts[2] >= Duration::from_millis(1_000));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn admissions_never_exceed_capacity_per_window(
        capacity in 1u32..5,
        window_ms in 50u64..500,
        tasks in 1usize..20,
        task_ms in 0u64..100,
    ) {
        let rt = paused_runtime();
        let starts = rt.block_on(async move {
            let scheduler = Arc::new(QuotaScheduler::new("reads", reservoir(capacity, window_ms, 3)));
            let epoch = Instant::now();
            let handles: Vec<_> = (0..tasks)
                .map(|_| {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        scheduler
                            .schedule(|| async move {
                                let started = Instant::now();
                                tokio::time::sleep(Duration::from_millis(task_ms)).await;
                                Ok(started)
                            })
                            .await
                    })
                })
                .collect();
            let mut starts = Vec::new();
            for handle in handles {
                let started = handle.await.expect("join").expect("admitted");
                starts.push((started - epoch).as_millis() as u64);
            }
            starts
        });

        prop_assert_eq!(starts.len(), tasks);
        let mut per_window = std::collections::HashMap::new();
        for start in starts {
            *per_window.entry(start / window_ms).or_insert(0u32) += 1;
        }
        for (window, count) in per_window {
            prop_assert!(count <= capacity, "window {} admitted {}", window, count);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn coalesced_callers_observe_one_invocation_and_identical_error() {
    let coalescer = Arc::new(Coalescer::<String>::new("reads"));
    let invocations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coalescer = Arc::clone(&coalescer);
            let invocations = Arc::clone(&invocations);
            tokio::spawn(async move {
                coalescer
                    .once("latest:@someone", || async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(GovernanceError::Upstream {
                            status: Some(502),
                            message: "bad gateway".to_string(),
                        })
                    })
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("join"));
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
    assert_upstream(&results[0], Some(502));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ledger_reservation_races_have_one_winner() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let ledgers: Vec<Arc<dyn IdempotencyLedger>> = vec![
        Arc::new(MemoryLedger::new()),
        Arc::new(LmdbLedger::open(dir.path(), 4).expect("open")),
    ];

    for ledger in ledgers {
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.try_reserve("reply:same").await })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            if handle.await.expect("join").expect("reserve") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1, "backend {:?}", ledger.backend());
        assert!(!ledger.try_reserve("reply:same").await.expect("reserve"));
    }
}

#[tokio::test(start_paused = true)]
async fn posting_the_same_reply_twice_calls_remote_once() {
    let mut config = GovernanceConfig::default();
    config.writes.min_spacing = Duration::ZERO;
    let governor = Governor::new(&config, Arc::new(MemoryLedger::new()));
    let remote_calls = Arc::new(AtomicUsize::new(0));

    let post = |calls: Arc<AtomicUsize>| {
        move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteResponse::ok(json!({"id": "1900", "text": "nice"})))
        }
    };

    let first = governor
        .write("123", "nice", post(Arc::clone(&remote_calls)))
        .await
        .expect("first post");
    let second = governor
        .write("123", "nice", post(Arc::clone(&remote_calls)))
        .await
        .expect("second post");

    assert!(!first.is_deduped());
    assert!(second.is_deduped());
    assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn write_cap_lock_is_monotonic() {
    let gate = WriteCapGate::new(1_000);
    let t1 = 2_000_000_000i64;
    let t2 = t1 - 86_400;

    gate.observe_at(
        &HeaderSnapshot::new().with("x-user-limit-24hour-reset", t1.to_string()),
        0,
    );
    gate.observe_at(
        &HeaderSnapshot::new().with("X-USER-LIMIT-24HOUR-RESET", t2.to_string()),
        1,
    );

    assert_eq!(gate.status().locked_until_ms, t1 * 1_000 + 1_000);
    assert_eq!(gate.status().reset_epoch, Some(t2));
}

proptest! {
    /// Only a reset header can lock writes; counts alone never do.
    #[test]
    fn counts_without_reset_never_lock(
        remaining in arb_header_value(),
        limit in arb_header_value(),
    ) {
        let gate = WriteCapGate::new(1_000);
        gate.observe(
            &HeaderSnapshot::new()
                .with("x-user-limit-24hour-remaining", remaining)
                .with("x-user-limit-24hour-limit", limit),
        );
        prop_assert!(!gate.is_locked());
        prop_assert!(gate.check().is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn breaker_opens_fails_fast_then_probes_once() {
    let config = GovernanceConfig::default().breaker;
    let cooldown = config.cooldown;
    let breaker = Arc::new(CircuitBreaker::new("resolve", config.clone()));
    let attempts = Arc::new(AtomicUsize::new(0));

    for _ in 0..config.min_calls {
        let attempts = Arc::clone(&attempts);
        let _: Result<(), _> = breaker
            .call(|| async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GovernanceError::Upstream {
                    status: Some(500),
                    message: "down".to_string(),
                })
            })
            .await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let before = attempts.load(Ordering::SeqCst);
    let rejected: Result<(), _> = breaker
        .call(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
    assert_circuit_open(&rejected);
    assert_eq!(attempts.load(Ordering::SeqCst), before);

    tokio::time::advance(cooldown).await;

    // two concurrent callers: the probe holds the slot, the other fails fast
    let gate = Arc::new(tokio::sync::Notify::new());
    let probe = {
        let breaker = Arc::clone(&breaker);
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            breaker
                .call(|| async move {
                    gate.notified().await;
                    Ok::<_, GovernanceError>("recovered")
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    let concurrent: Result<(), _> = breaker.call(|| async { Ok(()) }).await;
    assert_circuit_open(&concurrent);

    gate.notify_one();
    assert_eq!(probe.await.expect("join"), Ok("recovered"));
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn read_path_caches_until_expiry() {
    let mut config = GovernanceConfig::default();
    config.reads.min_spacing = Duration::ZERO;
    config.cache.ttl = Duration::from_millis(500);
    let governor = Governor::new(&config, Arc::new(MemoryLedger::new()));
    let calls = Arc::new(Mutex::new(0u32));

    let fetch = |calls: Arc<Mutex<u32>>| {
        move || async move {
            let mut n = calls.lock().expect("calls lock");
            *n += 1;
            let body = json!({ "n": *n });
            drop(n);
            Ok(RemoteResponse::ok(body))
        }
    };

    let a = governor
        .read("resolve", "resolve:@jack", fetch(Arc::clone(&calls)))
        .await
        .expect("a");
    let b = governor
        .read("resolve", "resolve:@jack", fetch(Arc::clone(&calls)))
        .await
        .expect("b");
    assert_eq!(a.value, json!({"n": 1}));
    assert!(b.cached);
    assert_eq!(b.value, a.value);

    tokio::time::advance(Duration::from_millis(501)).await;
    let c = governor
        .read("resolve", "resolve:@jack", fetch(Arc::clone(&calls)))
        .await
        .expect("c");
    assert!(!c.cached);
    assert_eq!(c.value, json!({"n": 2}));
}

#[tokio::test(start_paused = true)]
async fn write_failures_are_not_retried() {
    let mut config = GovernanceConfig::default();
    config.writes.min_spacing = Duration::ZERO;
    let governor = Governor::new(&config, Arc::new(MemoryLedger::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let result = governor
        .write("77", "hi there", move || async move {
            counted.fetch_add(1, Ordering::SeqCst);
            Err(RemoteFailure::new(500, "internal"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // writes never touch a breaker
    assert!(governor.breaker_snapshots().is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_write_is_rejected_once_the_cap_locks() {
    let mut config = GovernanceConfig::default();
    config.writes.min_spacing = Duration::ZERO;
    config.writes.max_concurrent = 1;
    let governor = Governor::new(&config, Arc::new(MemoryLedger::new()));
    let reset = now_epoch_ms() / 1_000 + 3_600;
    let second_calls = Arc::new(AtomicUsize::new(0));

    let first = governor.write("1", "first", move || async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(fixtures::rate_limited(fixtures::write_cap_headers(0, 17, reset)))
    });
    let second = {
        let counted = Arc::clone(&second_calls);
        let governor = &governor;
        async move {
            // admitted by the early check, then queued behind the first write
            tokio::time::sleep(Duration::from_millis(5)).await;
            governor
                .write("2", "second", move || async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(RemoteResponse::ok(json!({"id": "2"})))
                })
                .await
        }
    };
    let (first, second) = tokio::join!(first, second);

    assert_cadence_rate_limited(&first, LimitScope::UserDaily);
    assert_cadence_rate_limited(&second, LimitScope::UserDaily);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert!(governor.write_cap().is_locked());
}

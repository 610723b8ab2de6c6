//! Circuit breaker for read operations.
//!
//! One breaker per remote operation kind. The error rate is computed over a
//! trailing window of call outcomes; once it reaches the threshold (with at
//! least `min_calls` samples) the circuit opens and calls fail fast. After
//! the cooldown a single probe is let through and its outcome decides
//! between closing and re-opening.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cadence_core::{BreakerConfig, BreakerSnapshot, CircuitState, GovernanceError};
use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Window {
    /// (finished at, failed)
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

impl Window {
    fn prune(&mut self, now: Instant, span: std::time::Duration) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) > span {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, failed)| *failed).count()
    }
}

pub struct CircuitBreaker {
    operation: String,
    config: BreakerConfig,
    state: AtomicU8,
    window: Mutex<Window>,
}

/// Admission ticket for one call through the breaker.
///
/// An unsettled half-open probe (its future was dropped) releases the probe
/// slot so the circuit cannot wedge in `HalfOpen`.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, failed: bool) {
        self.settled = true;
        self.breaker.record(self.probe, failed);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.lock().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            operation: operation.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            window: Mutex::new(Window::default()),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: CircuitState) {
        let previous = CircuitState::from(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            tracing::info!(
                operation = %self.operation,
                from = %previous,
                to = %state,
                "Circuit breaker transition"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask for permission to make one call.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, GovernanceError> {
        let now = Instant::now();
        let mut window = self.lock();

        match self.state() {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let opened_at = window.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened_at);
                if elapsed >= self.config.cooldown {
                    window.probe_in_flight = true;
                    self.set_state(CircuitState::HalfOpen);
                    Ok(self.permit(true))
                } else {
                    Err(self.open_error((self.config.cooldown - elapsed).as_millis() as u64))
                }
            }
            CircuitState::HalfOpen => {
                if window.probe_in_flight {
                    Err(self.open_error(0))
                } else {
                    window.probe_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(&self, probe: bool) -> BreakerPermit<'_> {
        BreakerPermit {
            breaker: self,
            probe,
            settled: false,
        }
    }

    fn open_error(&self, retry_after_ms: u64) -> GovernanceError {
        GovernanceError::CircuitOpen {
            operation: self.operation.clone(),
            retry_after_ms,
        }
    }

    fn record(&self, probe: bool, failed: bool) {
        let now = Instant::now();
        let mut window = self.lock();
        window.prune(now, self.config.rolling_window);
        window.outcomes.push_back((now, failed));

        if probe {
            window.probe_in_flight = false;
            if failed {
                window.opened_at = Some(now);
                self.set_state(CircuitState::Open);
            } else {
                window.outcomes.clear();
                window.opened_at = None;
                self.set_state(CircuitState::Closed);
            }
            return;
        }

        if failed && self.state() == CircuitState::Closed {
            let calls = window.outcomes.len();
            let failures = window.failures();
            if calls >= self.config.min_calls as usize
                && failures * 100 >= self.config.error_threshold_pct as usize * calls
            {
                tracing::warn!(
                    operation = %self.operation,
                    calls,
                    failures,
                    "Error rate over threshold, opening circuit"
                );
                window.opened_at = Some(now);
                self.set_state(CircuitState::Open);
            }
        }
    }

    /// Run `op` through the breaker with the per-call timeout.
    ///
    /// Only dependency failures (`Upstream`, `Timeout`) count against the
    /// error rate.
    pub async fn call<F, Fut, T>(&self, op: F) -> Result<T, GovernanceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GovernanceError>>,
    {
        let permit = self.try_acquire()?;
        let outcome = match tokio::time::timeout(self.config.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(GovernanceError::Timeout {
                operation: self.operation.clone(),
                timeout_ms: self.config.call_timeout.as_millis() as u64,
            }),
        };
        let failed = matches!(&outcome, Err(e) if e.is_dependency_failure());
        permit.record(failed);
        outcome
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        let mut window = self.lock();
        window.prune(now, self.config.rolling_window);
        let state = self.state();
        let retry_after_ms = match (state, window.opened_at) {
            (CircuitState::Open, Some(opened_at)) => Some(
                self.config
                    .cooldown
                    .saturating_sub(now.duration_since(opened_at))
                    .as_millis() as u64,
            ),
            _ => None,
        };
        BreakerSnapshot {
            operation: self.operation.clone(),
            state,
            calls_in_window: window.outcomes.len(),
            failures_in_window: window.failures(),
            retry_after_ms,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("operation", &self.operation)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Breakers keyed by operation kind, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, operation: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(operation) {
            return Arc::clone(existing.value());
        }
        let breaker = self
            .breakers
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(operation, self.config.clone())));
        Arc::clone(breaker.value())
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.operation.cmp(&b.operation));
        snapshots
    }
}

//! Quota scheduler: token-bucket admission control.
//!
//! A reservoir of `capacity` admissions refills wholesale at fixed window
//! boundaries measured from scheduler creation. Admissions are FIFO: a
//! fair async mutex serializes the head of the queue, and only the head
//! waits on concurrency, reservoir and spacing. Admitted task bodies run
//! outside every lock.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::{GovernanceError, ReservoirConfig, ReservoirSnapshot};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug)]
struct Reservoir {
    remaining: u32,
    /// Index of the window `remaining` belongs to.
    window: u64,
    last_start: Option<Instant>,
}

pub struct QuotaScheduler {
    name: String,
    config: ReservoirConfig,
    epoch: Instant,
    reservoir: Mutex<Reservoir>,
    head: AsyncMutex<()>,
    permits: Arc<Semaphore>,
    queued: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

/// Held for the duration of an admitted task.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    pub waited: Duration,
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl QuotaScheduler {
    pub fn new(name: impl Into<String>, config: ReservoirConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name: name.into(),
            epoch: Instant::now(),
            reservoir: Mutex::new(Reservoir {
                remaining: config.capacity,
                window: 0,
                last_start: None,
            }),
            head: AsyncMutex::new(()),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: AtomicUsize::new(0),
            shutdown,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReservoirConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Reservoir> {
        self.reservoir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn window_index(&self, now: Instant) -> u64 {
        let elapsed = now.duration_since(self.epoch).as_nanos();
        (elapsed / self.config.refill_interval.as_nanos().max(1)) as u64
    }

    fn window_end(&self, index: u64) -> Instant {
        let nanos = self.config.refill_interval.as_nanos() * (index as u128 + 1);
        self.epoch + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    fn refill(&self, reservoir: &mut Reservoir, now: Instant) {
        let index = self.window_index(now);
        if index > reservoir.window {
            reservoir.window = index;
            reservoir.remaining = self.config.capacity;
        }
    }

    fn closed_error(&self) -> GovernanceError {
        GovernanceError::SchedulerClosed {
            scheduler: self.name.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Wait for admission. FIFO relative to other callers.
    pub async fn admit(&self) -> Result<Admission, GovernanceError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let started = Instant::now();
        self.queued.fetch_add(1, Ordering::SeqCst);
        let _queued = QueuedGuard(&self.queued);

        let _head = tokio::select! {
            guard = self.head.lock() => guard,
            _ = self.closed() => return Err(self.closed_error()),
        };

        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| self.closed_error())?
            }
            _ = self.closed() => return Err(self.closed_error()),
        };

        loop {
            let wait = {
                let now = Instant::now();
                let mut reservoir = self.lock();
                self.refill(&mut reservoir, now);

                let mut wait = Duration::ZERO;
                let mut reservoir_wait = false;
                if reservoir.remaining == 0 {
                    wait = self.window_end(reservoir.window).duration_since(now);
                    reservoir_wait = true;
                }
                if let Some(last) = reservoir.last_start {
                    let next = last + self.config.min_spacing;
                    if next > now {
                        wait = wait.max(next.duration_since(now));
                    }
                }

                if wait.is_zero() {
                    reservoir.remaining -= 1;
                    reservoir.last_start = Some(now);
                    break;
                }

                if let Some(max_wait) = self.config.max_wait {
                    if reservoir_wait && wait > max_wait {
                        tracing::debug!(
                            scheduler = %self.name,
                            wait_ms = wait.as_millis() as u64,
                            "Reservoir wait exceeds bound, rejecting"
                        );
                        return Err(GovernanceError::QuotaExceeded {
                            scheduler: self.name.clone(),
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                }
                wait
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.closed() => return Err(self.closed_error()),
            }
        }

        let waited = started.elapsed();
        tracing::debug!(
            scheduler = %self.name,
            waited_ms = waited.as_millis() as u64,
            "Admitted task"
        );
        Ok(Admission {
            _permit: permit,
            waited,
        })
    }

    /// Run `task` once admitted. The task's own error propagates unchanged.
    pub async fn schedule<F, Fut, T>(&self, task: F) -> Result<T, GovernanceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GovernanceError>>,
    {
        let admission = self.admit().await?;
        let result = task().await;
        drop(admission);
        result
    }

    /// Stop admitting. Queued callers fail with `SchedulerClosed`; admitted
    /// tasks run to completion.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!(scheduler = %self.name, "Scheduler shut down");
        }
        self.permits.close();
    }

    pub fn snapshot(&self) -> ReservoirSnapshot {
        let now = Instant::now();
        let mut reservoir = self.lock();
        self.refill(&mut reservoir, now);
        let in_flight = if self.permits.is_closed() {
            0
        } else {
            self.config
                .max_concurrent
                .saturating_sub(self.permits.available_permits())
        };
        ReservoirSnapshot {
            name: self.name.clone(),
            capacity: self.config.capacity,
            remaining: reservoir.remaining,
            max_concurrent: self.config.max_concurrent,
            in_flight,
            queued: self.queued.load(Ordering::SeqCst),
            next_refill_in_ms: self
                .window_end(reservoir.window)
                .duration_since(now)
                .as_millis() as u64,
            closed: self.is_closed(),
        }
    }
}

impl std::fmt::Debug for QuotaScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaScheduler")
            .field("name", &self.name)
            .field("capacity", &self.config.capacity)
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish()
    }
}

//! Single-flight coalescing of concurrent calls that share a key.
//!
//! The first caller for a key spawns the task; later callers join the same
//! shared outcome. The task is spawned, so it runs to completion even if
//! every waiter goes away, and it removes its own entry when it settles
//! (including on panic).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use cadence_core::GovernanceError;
use futures_util::future::{BoxFuture, FutureExt, Shared};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, GovernanceError>>>;
type InFlight<T> = Arc<Mutex<HashMap<String, SharedOutcome<T>>>>;

pub struct Coalescer<T> {
    name: &'static str,
    in_flight: InFlight<T>,
}

/// Removes the entry for `key` when the spawned task finishes or unwinds.
struct Settle<T> {
    in_flight: InFlight<T>,
    key: String,
}

impl<T> Drop for Settle<T> {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

fn lock<T>(in_flight: &InFlight<T>) -> MutexGuard<'_, HashMap<String, SharedOutcome<T>>> {
    in_flight
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `task` for `key`, or join the invocation already in flight.
    ///
    /// Every caller that joins observes the same outcome, error included.
    pub async fn once<F, Fut>(&self, key: &str, task: F) -> Result<T, GovernanceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GovernanceError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(existing) => {
                    tracing::debug!(coalescer = self.name, key, "Joined in-flight call");
                    existing.clone()
                }
                None => {
                    let fut = task();
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    // The entry is inserted before this lock is released, so
                    // the task's own removal always runs after the insert.
                    let handle = tokio::spawn(async move {
                        let _settle = Settle {
                            in_flight: registry,
                            key: owned_key,
                        };
                        fut.await
                    });
                    let shared = async move {
                        match handle.await {
                            Ok(outcome) => outcome,
                            Err(e) => Err(GovernanceError::TaskAborted {
                                reason: e.to_string(),
                            }),
                        }
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl<T> std::fmt::Debug for Coalescer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("name", &self.name)
            .field("in_flight", &lock(&self.in_flight).len())
            .finish()
    }
}

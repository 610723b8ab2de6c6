//! Idempotency ledger: a durable set of already-executed write keys.
//!
//! Insert-if-absent is the only mutation. There is no delete path.

pub mod lmdb;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::{CadenceResult, LedgerSettings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use lmdb::{LmdbLedger, LmdbLedgerError};
pub use memory::MemoryLedger;

/// Which backend a ledger instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Lmdb,
    Memory,
}

impl LedgerBackend {
    pub fn is_durable(&self) -> bool {
        matches!(self, LedgerBackend::Lmdb)
    }
}

/// A committed write intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Record `key` if absent.
    ///
    /// Returns `true` for exactly one caller per key, across concurrent
    /// callers and (for durable backends) across restarts.
    async fn try_reserve(&self, key: &str) -> CadenceResult<bool>;

    /// Look up a previously reserved key.
    async fn get(&self, key: &str) -> CadenceResult<Option<LedgerRecord>>;

    async fn contains(&self, key: &str) -> CadenceResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Number of recorded keys.
    async fn len(&self) -> CadenceResult<u64>;

    fn backend(&self) -> LedgerBackend;
}

/// Open the configured ledger.
///
/// A durable ledger that fails to open is replaced by an in-memory one for
/// the rest of the process lifetime; the fallback is never swapped back.
pub fn open_ledger(settings: &LedgerSettings) -> Arc<dyn IdempotencyLedger> {
    match &settings.path {
        Some(path) => match LmdbLedger::open(path, settings.max_size_mb) {
            Ok(ledger) => {
                tracing::info!(path = %path.display(), "Opened durable idempotency ledger");
                Arc::new(ledger)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Durable ledger unavailable, falling back to in-memory ledger"
                );
                Arc::new(MemoryLedger::new())
            }
        },
        None => {
            tracing::info!("Using in-memory idempotency ledger");
            Arc::new(MemoryLedger::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_path_is_memory() {
        let ledger = open_ledger(&LedgerSettings {
            path: None,
            max_size_mb: 1,
        });
        assert_eq!(ledger.backend(), LedgerBackend::Memory);
        assert!(!ledger.backend().is_durable());
    }

    #[test]
    fn test_unopenable_path_falls_back_to_memory() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        // a regular file cannot host an LMDB environment directory
        let ledger = open_ledger(&LedgerSettings {
            path: Some(file.path().join("ledger")),
            max_size_mb: 1,
        });
        assert_eq!(ledger.backend(), LedgerBackend::Memory);
    }

    #[test]
    fn test_open_with_path_is_durable() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let ledger = open_ledger(&LedgerSettings {
            path: Some(dir.path().to_path_buf()),
            max_size_mb: 1,
        });
        assert_eq!(ledger.backend(), LedgerBackend::Lmdb);
    }
}

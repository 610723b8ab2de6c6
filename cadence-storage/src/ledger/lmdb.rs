//! LMDB-backed idempotency ledger.
//!
//! Uses the heed crate (Rust bindings for LMDB). LMDB serializes write
//! transactions, so the existence check and insert of `try_reserve` run
//! inside one write transaction and are atomic across threads. Records are
//! durable once the transaction commits.

use std::path::Path;

use async_trait::async_trait;
use cadence_core::{CadenceError, CadenceResult, StorageError};
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};

use super::{IdempotencyLedger, LedgerBackend, LedgerRecord};

/// Error type for LMDB ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbLedgerError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Corrupt ledger record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbLedgerError> for CadenceError {
    fn from(e: LmdbLedgerError) -> Self {
        match e {
            LmdbLedgerError::EnvOpen(reason) | LmdbLedgerError::DbOpen(reason) => {
                CadenceError::Storage(StorageError::OpenFailed {
                    backend: "lmdb".to_string(),
                    reason,
                })
            }
            other => CadenceError::Storage(StorageError::TransactionFailed {
                reason: other.to_string(),
            }),
        }
    }
}

/// Value stored under each key.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    created_at: DateTime<Utc>,
}

pub struct LmdbLedger {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbLedger {
    /// Open (or create) a ledger in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbLedgerError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbLedgerError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbLedgerError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    fn reserve_blocking(&self, key: &str) -> Result<bool, LmdbLedgerError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let existing = self
            .db
            .get(&wtxn, key.as_bytes())
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;
        if existing.is_some() {
            // dropping the transaction aborts it
            return Ok(false);
        }

        let value = serde_json::to_vec(&StoredRecord {
            created_at: Utc::now(),
        })
        .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.as_bytes(), &value)
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        Ok(true)
    }

    fn get_blocking(&self, key: &str) -> Result<Option<LedgerRecord>, LmdbLedgerError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;

        let Some(bytes) = self
            .db
            .get(&rtxn, key.as_bytes())
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?
        else {
            return Ok(None);
        };

        let stored: StoredRecord =
            serde_json::from_slice(bytes).map_err(|e| LmdbLedgerError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(LedgerRecord {
            key: key.to_string(),
            created_at: stored.created_at,
        }))
    }

    fn len_blocking(&self) -> Result<u64, LmdbLedgerError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbLedgerError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl IdempotencyLedger for LmdbLedger {
    async fn try_reserve(&self, key: &str) -> CadenceResult<bool> {
        Ok(self.reserve_blocking(key)?)
    }

    async fn get(&self, key: &str) -> CadenceResult<Option<LedgerRecord>> {
        Ok(self.get_blocking(key)?)
    }

    async fn len(&self) -> CadenceResult<u64> {
        Ok(self.len_blocking()?)
    }

    fn backend(&self) -> LedgerBackend {
        LedgerBackend::Lmdb
    }
}

impl std::fmt::Debug for LmdbLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbLedger")
            .field("path", &self.env.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_ledger() -> (LmdbLedger, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let ledger = LmdbLedger::open(temp_dir.path(), 10).expect("ledger open should succeed");
        (ledger, temp_dir)
    }

    #[tokio::test]
    async fn test_reserve_then_duplicate() {
        let (ledger, _dir) = create_test_ledger();
        assert!(ledger.try_reserve("reply:1").await.expect("reserve"));
        assert!(!ledger.try_reserve("reply:1").await.expect("reserve"));
        assert!(ledger.try_reserve("reply:2").await.expect("reserve"));
        assert_eq!(ledger.len().await.expect("len"), 2);
    }

    #[tokio::test]
    async fn test_get_returns_record() {
        let (ledger, _dir) = create_test_ledger();
        assert!(ledger.get("reply:x").await.expect("get").is_none());
        ledger.try_reserve("reply:x").await.expect("reserve");
        let record = ledger.get("reply:x").await.expect("get").expect("record");
        assert_eq!(record.key, "reply:x");
        assert!(record.created_at <= Utc::now());
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: CadenceError = LmdbLedgerError::EnvOpen("denied".to_string()).into();
        assert!(matches!(
            err,
            CadenceError::Storage(StorageError::OpenFailed { .. })
        ));
        let err: CadenceError = LmdbLedgerError::Transaction("full".to_string()).into();
        assert!(matches!(
            err,
            CadenceError::Storage(StorageError::TransactionFailed { .. })
        ));
    }
}

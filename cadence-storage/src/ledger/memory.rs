//! In-memory ledger, used when no durable path is configured or the durable
//! store cannot be opened.

use async_trait::async_trait;
use cadence_core::CadenceResult;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{IdempotencyLedger, LedgerBackend, LedgerRecord};

#[derive(Debug, Default)]
pub struct MemoryLedger {
    keys: DashMap<String, DateTime<Utc>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryLedger {
    async fn try_reserve(&self, key: &str) -> CadenceResult<bool> {
        // The entry guard holds the shard lock across check and insert.
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> CadenceResult<Option<LedgerRecord>> {
        Ok(self.keys.get(key).map(|created_at| LedgerRecord {
            key: key.to_string(),
            created_at: *created_at,
        }))
    }

    async fn len(&self) -> CadenceResult<u64> {
        Ok(self.keys.len() as u64)
    }

    fn backend(&self) -> LedgerBackend {
        LedgerBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reserve_twice() {
        let ledger = MemoryLedger::new();
        assert!(ledger.try_reserve("reply:abc").await.expect("reserve"));
        assert!(!ledger.try_reserve("reply:abc").await.expect("reserve"));
        assert!(ledger.contains("reply:abc").await.expect("contains"));
        assert_eq!(ledger.len().await.expect("len"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reserve_exactly_one_wins() {
        let ledger = Arc::new(MemoryLedger::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.try_reserve("reply:race").await.expect("reserve")
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.expect("join") {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}

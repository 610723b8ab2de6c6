//! Cadence Storage - Cache and Idempotency Ledger
//!
//! The TTL cache fronts governed reads. The idempotency ledger records
//! executed write intents, durably in LMDB when a path is configured.

pub mod cache;
pub mod ledger;

pub use cache::{CacheStats, TtlCache};
pub use ledger::{
    open_ledger, IdempotencyLedger, LedgerBackend, LedgerRecord, LmdbLedger, LmdbLedgerError,
    MemoryLedger,
};

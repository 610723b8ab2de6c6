//! Read-through cache for governed remote reads.
//!
//! The cache is a pure optimization: a miss or an expired entry only ever
//! costs a remote call, never an incorrect result.

pub mod ttl;

pub use ttl::{CacheStats, TtlCache};

//! Cadence Core - Governance Types
//!
//! Pure data structures shared by every other crate: the error taxonomy,
//! configuration, header parsing, idempotency keys and status snapshots.
//! No I/O happens here.

pub mod config;
pub mod error;
pub mod headers;
pub mod idempotency;
pub mod status;

pub use config::*;
pub use error::*;
pub use headers::*;
pub use idempotency::*;
pub use status::*;

/// Wall-clock time as milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> EpochMillis {
    chrono::Utc::now().timestamp_millis()
}

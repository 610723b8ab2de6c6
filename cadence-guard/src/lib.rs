//! Cadence Guard - Outbound Call Governance
//!
//! Sits between application logic and a quota-constrained remote API:
//!
//! - [`QuotaScheduler`]: reservoir admission with concurrency and spacing bounds
//! - [`CircuitBreaker`]: fail-fast for failing read dependencies
//! - [`WriteCapGate`]: lockout derived from provider write-quota headers
//! - [`Coalescer`]: one physical call per key in flight
//! - [`Governor`]: the read and write paths composed from the above

pub mod breaker;
pub mod call_log;
pub mod coalescer;
pub mod governor;
pub mod remote;
pub mod scheduler;
pub mod write_cap;

pub use breaker::{BreakerPermit, BreakerRegistry, CircuitBreaker};
pub use call_log::CallLog;
pub use coalescer::Coalescer;
pub use governor::{Governor, ReadOutcome, WriteOutcome};
pub use remote::{RemoteFailure, RemoteResponse, RemoteResult, SocialApi, TimelineFilter};
pub use scheduler::{Admission, QuotaScheduler};
pub use write_cap::{Lockout, ReadLockout, WriteCapGate, READ_LOCK_MARGIN_MS};

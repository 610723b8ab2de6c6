//! Provider-reported quota lockouts.
//!
//! [`WriteCapGate`] turns the 24-hour per-user write headers into a local
//! lockout that rejects writes before they are attempted. [`ReadLockout`]
//! does the same for window-level read limits reported on a 429.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cadence_core::{
    now_epoch_ms, parse_rate_limit_reset, EpochMillis, GovernanceError, HeaderField,
    HeaderSnapshot, LimitScope, ReadLockSnapshot, WriteCapHeaders, WriteCapSnapshot,
    WriteCapStatus,
};

/// Margin added to `x-rate-limit-reset` before reads resume.
pub const READ_LOCK_MARGIN_MS: i64 = 1_000;

/// A deadline that only moves forward.
#[derive(Debug, Default)]
pub struct Lockout {
    until_ms: AtomicI64,
}

impl Lockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the deadline to at least `until_ms`. Returns whether it moved.
    pub fn raise_to(&self, until_ms: EpochMillis) -> bool {
        self.until_ms.fetch_max(until_ms, Ordering::SeqCst) < until_ms
    }

    pub fn until_ms(&self) -> EpochMillis {
        self.until_ms.load(Ordering::SeqCst)
    }

    pub fn is_locked_at(&self, now_ms: EpochMillis) -> bool {
        now_ms < self.until_ms()
    }
}

// ============================================================================
// WRITE CAP
// ============================================================================

#[derive(Debug)]
pub struct WriteCapGate {
    status: RwLock<WriteCapStatus>,
    safety_margin_ms: i64,
}

impl WriteCapGate {
    pub fn new(safety_margin_ms: i64) -> Self {
        Self {
            status: RwLock::new(WriteCapStatus::default()),
            safety_margin_ms,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, WriteCapStatus> {
        self.status.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WriteCapStatus> {
        self.status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fold response headers from a write attempt into the status.
    ///
    /// Absent fields leave prior values untouched. Returns whether anything
    /// was recorded.
    pub fn observe(&self, headers: &HeaderSnapshot) -> bool {
        self.observe_at(headers, now_epoch_ms())
    }

    pub fn observe_at(&self, headers: &HeaderSnapshot, now_ms: EpochMillis) -> bool {
        let parsed = WriteCapHeaders::parse(headers);
        if !parsed.any_found() {
            return false;
        }

        let mut status = self.write();
        if let HeaderField::Found(remaining) = parsed.remaining {
            status.remaining = Some(remaining);
        }
        if let HeaderField::Found(limit) = parsed.limit {
            status.limit = Some(limit);
        }
        if let HeaderField::Found(reset) = parsed.reset_epoch {
            status.reset_epoch = Some(reset);
            let until = reset
                .saturating_mul(1_000)
                .saturating_add(self.safety_margin_ms);
            if until > status.locked_until_ms {
                tracing::warn!(
                    reset_epoch = reset,
                    locked_until_ms = until,
                    remaining = ?status.remaining,
                    "Write cap lockout raised"
                );
                status.locked_until_ms = until;
            }
        }
        status.updated_at_ms = Some(now_ms);
        true
    }

    pub fn is_locked(&self) -> bool {
        self.read().is_locked_at(now_epoch_ms())
    }

    /// Reject if writes are currently locked.
    pub fn check(&self) -> Result<(), GovernanceError> {
        self.check_at(now_epoch_ms())
    }

    pub fn check_at(&self, now_ms: EpochMillis) -> Result<(), GovernanceError> {
        let status = *self.read();
        if status.is_locked_at(now_ms) {
            Err(Self::rejection(&status))
        } else {
            Ok(())
        }
    }

    /// The `RateLimited` error describing the current status.
    pub fn rate_limited(&self) -> GovernanceError {
        Self::rejection(&self.read())
    }

    fn rejection(status: &WriteCapStatus) -> GovernanceError {
        GovernanceError::RateLimited {
            scope: LimitScope::UserDaily,
            remaining: status.remaining,
            reset_epoch: status.reset_epoch,
            locked_until_ms: status.locked_until_ms,
        }
    }

    pub fn status(&self) -> WriteCapStatus {
        *self.read()
    }

    pub fn snapshot(&self) -> WriteCapSnapshot {
        self.read().snapshot(now_epoch_ms())
    }
}

// ============================================================================
// READ LOCKOUT
// ============================================================================

#[derive(Debug, Default)]
pub struct ReadLockout {
    lock: Lockout,
}

impl ReadLockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rate-limited read. Returns the lock deadline if the response
    /// carried a reset time.
    pub fn observe_rate_limited(&self, headers: &HeaderSnapshot) -> Option<EpochMillis> {
        let reset = parse_rate_limit_reset(headers).value()?;
        let until = reset.saturating_mul(1_000).saturating_add(READ_LOCK_MARGIN_MS);
        if self.lock.raise_to(until) {
            tracing::warn!(locked_until_ms = until, "Read lockout raised");
        }
        Some(until)
    }

    pub fn check(&self) -> Result<(), GovernanceError> {
        self.check_at(now_epoch_ms())
    }

    pub fn check_at(&self, now_ms: EpochMillis) -> Result<(), GovernanceError> {
        if self.lock.is_locked_at(now_ms) {
            Err(self.rate_limited())
        } else {
            Ok(())
        }
    }

    pub fn rate_limited(&self) -> GovernanceError {
        let until = self.lock.until_ms();
        GovernanceError::RateLimited {
            scope: LimitScope::Read,
            remaining: None,
            reset_epoch: (until > 0).then(|| (until - READ_LOCK_MARGIN_MS) / 1_000),
            locked_until_ms: until,
        }
    }

    pub fn lock_until_ms(&self) -> EpochMillis {
        self.lock.until_ms()
    }

    pub fn snapshot(&self) -> ReadLockSnapshot {
        let now = now_epoch_ms();
        ReadLockSnapshot {
            locked: self.lock.is_locked_at(now),
            lock_until_ms: self.lock.until_ms(),
            now,
        }
    }
}

//! Idempotency key derivation for writes

use sha2::{Digest, Sha256};

/// Prefix shared by every reply idempotency key.
pub const REPLY_KEY_PREFIX: &str = "reply:";

/// Length of every key produced by [`idempotency_key`].
pub const IDEMPOTENCY_KEY_LEN: usize = REPLY_KEY_PREFIX.len() + 64;

/// Derive the idempotency key for posting `content` in reply to `target_id`.
///
/// Content is trimmed before hashing so whitespace-only differences map to
/// the same intent. The target and content are separated by a NUL byte so
/// no split of one string into the other can collide.
pub fn idempotency_key(target_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_id.trim().as_bytes());
    hasher.update([0u8]);
    hasher.update(content.trim().as_bytes());
    format!("{}{}", REPLY_KEY_PREFIX, hex::encode(hasher.finalize()))
}

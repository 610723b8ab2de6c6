//! Bounded in-process cache with per-entry expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use cadence_core::CacheSettings;
use serde::Serialize;
use tokio::time::Instant;

/// A cached value and its deadline.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    /// Insertion sequence, used to skip stale eviction-queue slots.
    seq: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate in `0.0..=1.0`; zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Keys in insertion order. May hold slots for overwritten or expired
    /// entries; those are skipped by sequence number.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
    stats: CacheStats,
}

/// TTL cache with oldest-inserted eviction.
///
/// Expired entries are removed lazily by the `get` that observes them.
/// Reads never fail; a poisoned lock is recovered since the cache holds no
/// invariant a panicking writer could break beyond a lost entry.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self::new(settings.ttl, settings.max_entries)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up `key`. An expired entry is removed and reported absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if now > entry.expires_at => true,
            Some(entry) => {
                let value = entry.value.clone();
                inner.stats.hits += 1;
                return Some(value);
            }
            None => false,
        };
        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            inner.stats.entry_count = inner.entries.len() as u64;
        }
        inner.stats.misses += 1;
        None
    }

    /// Insert or replace `key`, evicting the oldest entry when full.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let expires_at = Instant::now() + self.ttl;
        let mut inner = self.lock();

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.max_entries {
                if !evict_oldest(&mut inner) {
                    break;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
        inner.stats.entry_count = inner.entries.len() as u64;

        // Overwrites leave dead slots behind; compact once they dominate.
        if inner.order.len() > self.max_entries.saturating_mul(2) {
            let Inner { entries, order, .. } = &mut *inner;
            order.retain(|(k, s)| entries.get(k).map(|e| e.seq == *s).unwrap_or(false));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Remove the oldest live entry. Returns false if nothing could be evicted.
fn evict_oldest<V>(inner: &mut Inner<V>) -> bool {
    while let Some((key, seq)) = inner.order.pop_front() {
        let live = inner
            .entries
            .get(&key)
            .map(|entry| entry.seq == seq)
            .unwrap_or(false);
        if live {
            inner.entries.remove(&key);
            inner.stats.evictions += 1;
            return true;
        }
    }
    false
}

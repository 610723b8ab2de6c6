//! Configuration types
//!
//! Every knob has a default so the process starts with no environment at
//! all. `from_env` reads the enumerated variables; unparsable or invalid
//! values are logged and replaced by their default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default provider window (15 minutes).
pub const DEFAULT_WINDOW_MS: u64 = 900_000;
pub const DEFAULT_READS_PER_WINDOW: u32 = 180;
pub const DEFAULT_POSTS_PER_WINDOW: u32 = 45;
pub const DEFAULT_READ_MIN_SPACING_MS: u64 = 100;
pub const DEFAULT_WRITE_MIN_SPACING_MS: u64 = 250;
pub const DEFAULT_READ_MAX_CONCURRENT: usize = 4;
pub const DEFAULT_WRITE_MAX_CONCURRENT: usize = 2;
pub const DEFAULT_CACHE_TTL_MS: u64 = 120_000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 2_000;
pub const DEFAULT_BREAKER_ERROR_THRESHOLD_PCT: u8 = 50;
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 10_000;
pub const DEFAULT_BREAKER_ROLLING_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_BREAKER_MIN_CALLS: u32 = 5;
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_WRITE_CAP_SAFETY_MARGIN_MS: i64 = 1_000;
pub const DEFAULT_LEDGER_PATH: &str = "./data/ledger";
pub const DEFAULT_LEDGER_MAX_SIZE_MB: usize = 64;

// ============================================================================
// RESERVOIR
// ============================================================================

/// Token-bucket parameters for one Quota Scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    /// Admissions allowed per refill interval.
    pub capacity: u32,
    /// Window length; the reservoir refills wholesale at each boundary.
    pub refill_interval: Duration,
    pub max_concurrent: usize,
    /// Minimum gap between the starts of consecutive admissions.
    pub min_spacing: Duration,
    /// Reject with `QuotaExceeded` instead of queueing when the reservoir
    /// wait would exceed this. `None` queues indefinitely.
    pub max_wait: Option<Duration>,
}

impl ReservoirConfig {
    pub fn reads_default() -> Self {
        Self {
            capacity: DEFAULT_READS_PER_WINDOW,
            refill_interval: Duration::from_millis(DEFAULT_WINDOW_MS),
            max_concurrent: DEFAULT_READ_MAX_CONCURRENT,
            min_spacing: Duration::from_millis(DEFAULT_READ_MIN_SPACING_MS),
            max_wait: None,
        }
    }

    pub fn writes_default() -> Self {
        Self {
            capacity: DEFAULT_POSTS_PER_WINDOW,
            refill_interval: Duration::from_millis(DEFAULT_WINDOW_MS),
            max_concurrent: DEFAULT_WRITE_MAX_CONCURRENT,
            min_spacing: Duration::from_millis(DEFAULT_WRITE_MIN_SPACING_MS),
            max_wait: None,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(invalid(name, "capacity", "0", "must be at least 1"));
        }
        if self.max_concurrent == 0 {
            return Err(invalid(name, "max_concurrent", "0", "must be at least 1"));
        }
        if self.refill_interval.is_zero() {
            return Err(invalid(name, "refill_interval", "0", "must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Configuration for the read-path circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Error percentage (1..=100) over the rolling window that opens the circuit.
    pub error_threshold_pct: u8,
    /// How long the circuit stays open before allowing a half-open probe.
    pub cooldown: Duration,
    /// Trailing window over which the error rate is computed.
    pub rolling_window: Duration,
    /// Calls required in the window before the rate is evaluated.
    pub min_calls: u32,
    /// Per-call wall-clock bound; exceeding it counts as a failure.
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_pct: DEFAULT_BREAKER_ERROR_THRESHOLD_PCT,
            cooldown: Duration::from_millis(DEFAULT_BREAKER_COOLDOWN_MS),
            rolling_window: Duration::from_millis(DEFAULT_BREAKER_ROLLING_WINDOW_MS),
            min_calls: DEFAULT_BREAKER_MIN_CALLS,
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_threshold_pct == 0 || self.error_threshold_pct > 100 {
            return Err(invalid(
                "breaker",
                "error_threshold_pct",
                &self.error_threshold_pct.to_string(),
                "must be within 1..=100",
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(invalid("breaker", "call_timeout", "0", "must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// CACHE / LEDGER / WRITE CAP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(DEFAULT_CACHE_TTL_MS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// LMDB directory. `None` selects the in-memory ledger.
    pub path: Option<PathBuf>,
    pub max_size_mb: usize,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_LEDGER_PATH)),
            max_size_mb: DEFAULT_LEDGER_MAX_SIZE_MB,
        }
    }
}

// ============================================================================
// GOVERNANCE CONFIG
// ============================================================================

/// Master configuration for the call-governance layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub reads: ReservoirConfig,
    pub writes: ReservoirConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheSettings,
    pub ledger: LedgerSettings,
    /// Added to provider-reported reset times before locking.
    pub write_cap_safety_margin_ms: i64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            reads: ReservoirConfig::reads_default(),
            writes: ReservoirConfig::writes_default(),
            breaker: BreakerConfig::default(),
            cache: CacheSettings::default(),
            ledger: LedgerSettings::default(),
            write_cap_safety_margin_ms: DEFAULT_WRITE_CAP_SAFETY_MARGIN_MS,
        }
    }
}

impl GovernanceConfig {
    /// Create GovernanceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `RATE_WINDOW_MS`: read window length (default: 900000)
    /// - `READS_PER_WINDOW`: read reservoir capacity (default: 180)
    /// - `POSTS_WINDOW_MS`: write window length (default: `RATE_WINDOW_MS`)
    /// - `POSTS_PER_WINDOW`: write reservoir capacity (default: 45)
    /// - `MIN_TIME_MS` / `WRITE_MIN_TIME_MS`: minimum spacing (default: 100 / 250)
    /// - `READ_MAX_CONCURRENT` / `WRITE_MAX_CONCURRENT` (default: 4 / 2)
    /// - `MAX_QUEUE_WAIT_MS`: optional admission wait bound
    /// - `CACHE_TTL_MS`, `CACHE_MAX_ENTRIES` (default: 120000, 2000)
    /// - `BREAKER_ERROR_THRESHOLD_PCT`, `BREAKER_COOLDOWN_MS`,
    ///   `BREAKER_ROLLING_WINDOW_MS`, `BREAKER_MIN_CALLS`
    /// - `CALL_TIMEOUT_MS` (default: 15000)
    /// - `WRITE_CAP_SAFETY_MARGIN_MS` (default: 1000)
    /// - `LEDGER_PATH` (empty = in-memory), `LEDGER_MAX_SIZE_MB`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str, default: u64| parse_or(&lookup, key, default);

        let window_ms = get("RATE_WINDOW_MS", DEFAULT_WINDOW_MS);
        let posts_window_ms = get("POSTS_WINDOW_MS", window_ms);
        let max_wait = lookup("MAX_QUEUE_WAIT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis);

        let reads = ReservoirConfig {
            capacity: parse_or(&lookup, "READS_PER_WINDOW", DEFAULT_READS_PER_WINDOW),
            refill_interval: Duration::from_millis(window_ms),
            max_concurrent: parse_or(&lookup, "READ_MAX_CONCURRENT", DEFAULT_READ_MAX_CONCURRENT),
            min_spacing: Duration::from_millis(get("MIN_TIME_MS", DEFAULT_READ_MIN_SPACING_MS)),
            max_wait,
        };
        let writes = ReservoirConfig {
            capacity: parse_or(&lookup, "POSTS_PER_WINDOW", DEFAULT_POSTS_PER_WINDOW),
            refill_interval: Duration::from_millis(posts_window_ms),
            max_concurrent: parse_or(
                &lookup,
                "WRITE_MAX_CONCURRENT",
                DEFAULT_WRITE_MAX_CONCURRENT,
            ),
            min_spacing: Duration::from_millis(get(
                "WRITE_MIN_TIME_MS",
                DEFAULT_WRITE_MIN_SPACING_MS,
            )),
            max_wait,
        };
        let breaker = BreakerConfig {
            error_threshold_pct: parse_or(
                &lookup,
                "BREAKER_ERROR_THRESHOLD_PCT",
                DEFAULT_BREAKER_ERROR_THRESHOLD_PCT,
            ),
            cooldown: Duration::from_millis(get("BREAKER_COOLDOWN_MS", DEFAULT_BREAKER_COOLDOWN_MS)),
            rolling_window: Duration::from_millis(get(
                "BREAKER_ROLLING_WINDOW_MS",
                DEFAULT_BREAKER_ROLLING_WINDOW_MS,
            )),
            min_calls: parse_or(&lookup, "BREAKER_MIN_CALLS", DEFAULT_BREAKER_MIN_CALLS),
            call_timeout: Duration::from_millis(get("CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS)),
        };
        let cache = CacheSettings {
            ttl: Duration::from_millis(get("CACHE_TTL_MS", DEFAULT_CACHE_TTL_MS)),
            max_entries: parse_or(&lookup, "CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES),
        };
        let ledger = LedgerSettings {
            path: match lookup("LEDGER_PATH") {
                Some(p) if p.trim().is_empty() => None,
                Some(p) => Some(PathBuf::from(p)),
                None => defaults.ledger.path.clone(),
            },
            max_size_mb: parse_or(&lookup, "LEDGER_MAX_SIZE_MB", DEFAULT_LEDGER_MAX_SIZE_MB),
        };

        let mut config = Self {
            reads,
            writes,
            breaker,
            cache,
            ledger,
            write_cap_safety_margin_ms: parse_or(
                &lookup,
                "WRITE_CAP_SAFETY_MARGIN_MS",
                DEFAULT_WRITE_CAP_SAFETY_MARGIN_MS,
            ),
        };

        if let Err(e) = config.reads.validate("reads") {
            tracing::warn!(error = %e, "Invalid read reservoir config, using defaults");
            config.reads = defaults.reads.clone();
        }
        if let Err(e) = config.writes.validate("writes") {
            tracing::warn!(error = %e, "Invalid write reservoir config, using defaults");
            config.writes = defaults.writes.clone();
        }
        if let Err(e) = config.breaker.validate() {
            tracing::warn!(error = %e, "Invalid breaker config, using defaults");
            config.breaker = defaults.breaker.clone();
        }
        if config.cache.max_entries == 0 {
            tracing::warn!("CACHE_MAX_ENTRIES must be positive, using default");
            config.cache.max_entries = DEFAULT_CACHE_MAX_ENTRIES;
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reads.validate("reads")?;
        self.writes.validate("writes")?;
        self.breaker.validate()?;
        if self.cache.max_entries == 0 {
            return Err(invalid("cache", "max_entries", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Unparsable config value, using default");
                default
            }
        },
        None => default,
    }
}

fn invalid(section: &str, field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: format!("{}.{}", section, field),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = GovernanceConfig::from_lookup(|_| None);
        assert_eq!(config, GovernanceConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.reads.capacity, 180);
        assert_eq!(config.writes.capacity, 45);
        assert_eq!(config.breaker.error_threshold_pct, 50);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = GovernanceConfig::from_lookup(lookup_from(&[
            ("RATE_WINDOW_MS", "1000"),
            ("READS_PER_WINDOW", "2"),
            ("MIN_TIME_MS", "0"),
            ("CACHE_TTL_MS", "50"),
            ("MAX_QUEUE_WAIT_MS", "250"),
        ]));
        assert_eq!(config.reads.capacity, 2);
        assert_eq!(config.reads.refill_interval, Duration::from_millis(1000));
        // write window follows the read window unless overridden
        assert_eq!(config.writes.refill_interval, Duration::from_millis(1000));
        assert_eq!(config.reads.min_spacing, Duration::ZERO);
        assert_eq!(config.cache.ttl, Duration::from_millis(50));
        assert_eq!(config.reads.max_wait, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let config = GovernanceConfig::from_lookup(lookup_from(&[
            ("READS_PER_WINDOW", "lots"),
            ("BREAKER_ERROR_THRESHOLD_PCT", "250"),
        ]));
        assert_eq!(config.reads.capacity, DEFAULT_READS_PER_WINDOW);
        assert_eq!(
            config.breaker.error_threshold_pct,
            DEFAULT_BREAKER_ERROR_THRESHOLD_PCT
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = GovernanceConfig::default();
        config.writes.capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        let from_env = GovernanceConfig::from_lookup(lookup_from(&[("POSTS_PER_WINDOW", "0")]));
        assert_eq!(from_env.writes.capacity, DEFAULT_POSTS_PER_WINDOW);
    }

    #[test]
    fn test_empty_ledger_path_selects_memory() {
        let config = GovernanceConfig::from_lookup(lookup_from(&[("LEDGER_PATH", "")]));
        assert!(config.ledger.path.is_none());
    }
}

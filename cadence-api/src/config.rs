//! API Configuration Module
//!
//! Server binding, CORS, inbound rate limiting, and the remote endpoints the
//! service talks to. Loaded from environment variables; every setting has a
//! default so a missing variable never prevents startup.

use std::net::SocketAddr;
use std::time::Duration;

use cadence_llm::providers::xai::{DEFAULT_XAI_BASE_URL, DEFAULT_XAI_MODEL};

use crate::error::{ApiError, ApiResult};

pub const DEFAULT_SOCIAL_API_BASE_URL: &str = "https://api.x.com/2";
pub const DEFAULT_TOKEN_BUDGET_DAILY: i64 = 1_000_000;
pub const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Server
    // ========================================================================
    pub bind_host: String,
    pub port: u16,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Inbound Rate Limiting
    // ========================================================================
    pub rate_limit_enabled: bool,

    /// Requests per minute per credential (or per client address when the
    /// request carries none).
    pub rate_limit_per_minute: u32,

    pub rate_limit_burst: u32,

    // ========================================================================
    // Remote services
    // ========================================================================
    pub social_api_base_url: String,

    /// Timeout for social API requests, including writes.
    pub social_api_timeout: Duration,

    /// `None` disables draft generation.
    pub xai_api_key: Option<String>,
    pub xai_base_url: String,
    pub xai_model: String,
    pub xai_timeout: Duration,
    pub token_budget_daily: i64,

    /// Per-call log lines for every remote call.
    pub log_calls: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            rate_limit_enabled: true,
            rate_limit_per_minute: 600,
            rate_limit_burst: 30,
            social_api_base_url: DEFAULT_SOCIAL_API_BASE_URL.to_string(),
            social_api_timeout: Duration::from_secs(20),
            xai_api_key: None,
            xai_base_url: DEFAULT_XAI_BASE_URL.to_string(),
            xai_model: DEFAULT_XAI_MODEL.to_string(),
            xai_timeout: Duration::from_secs(60),
            token_budget_daily: DEFAULT_TOKEN_BUDGET_DAILY,
            log_calls: false,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `CADENCE_API_BIND`: bind host (default: 0.0.0.0)
    /// - `PORT` / `CADENCE_API_PORT`: listen port (default: 8080)
    /// - `CADENCE_CORS_ORIGINS`: comma-separated allowed origins (empty = allow all)
    /// - `CADENCE_RATE_LIMIT_ENABLED`: "false" disables inbound limiting
    /// - `CADENCE_RATE_LIMIT_PER_MINUTE` (default: 600), `CADENCE_RATE_LIMIT_BURST` (default: 30)
    /// - `SOCIAL_API_BASE_URL`, `SOCIAL_API_TIMEOUT_MS`
    /// - `XAI_API_KEY`, `XAI_BASE_URL`, `XAI_MODEL`, `XAI_TIMEOUT_MS`
    /// - `XAI_TOKEN_BUDGET_DAILY` (default: 1000000)
    /// - `CADENCE_LOG_CALLS`: "true" enables per-call logging
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(default)
        };
        let non_empty = |key: &str| lookup(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let cors_origins = lookup("CADENCE_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let port = lookup("PORT")
            .or_else(|| lookup("CADENCE_API_PORT"))
            .and_then(|s| s.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        let rate_limit_enabled = lookup("CADENCE_RATE_LIMIT_ENABLED")
            .map(|s| s.trim().to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            bind_host: non_empty("CADENCE_API_BIND").unwrap_or(defaults.bind_host),
            port,
            cors_origins,
            cors_max_age_secs: parse_u64("CADENCE_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs),
            rate_limit_enabled,
            rate_limit_per_minute: parse_u64(
                "CADENCE_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute as u64,
            ) as u32,
            rate_limit_burst: parse_u64("CADENCE_RATE_LIMIT_BURST", defaults.rate_limit_burst as u64)
                as u32,
            social_api_base_url: non_empty("SOCIAL_API_BASE_URL")
                .unwrap_or(defaults.social_api_base_url),
            social_api_timeout: Duration::from_millis(parse_u64(
                "SOCIAL_API_TIMEOUT_MS",
                defaults.social_api_timeout.as_millis() as u64,
            )),
            xai_api_key: non_empty("XAI_API_KEY"),
            xai_base_url: non_empty("XAI_BASE_URL").unwrap_or(defaults.xai_base_url),
            xai_model: non_empty("XAI_MODEL").unwrap_or(defaults.xai_model),
            xai_timeout: Duration::from_millis(parse_u64(
                "XAI_TIMEOUT_MS",
                defaults.xai_timeout.as_millis() as u64,
            )),
            token_budget_daily: lookup("XAI_TOKEN_BUDGET_DAILY")
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(DEFAULT_TOKEN_BUDGET_DAILY),
            log_calls: flag("CADENCE_LOG_CALLS", false),
        }
    }

    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if running in production mode (strict CORS).
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ApiConfig::from_lookup(lookup(&[]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.social_api_base_url, "https://api.x.com/2");
        assert_eq!(config.xai_model, "grok-4-0709");
        assert_eq!(config.token_budget_daily, 1_000_000);
        assert!(config.xai_api_key.is_none());
        assert!(config.rate_limit_enabled);
        assert!(!config.log_calls);
        assert!(!config.is_production());
    }

    #[test]
    fn test_port_precedence_and_overrides() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("CADENCE_API_PORT", "9100"),
            ("XAI_API_KEY", "  "),
            ("CADENCE_LOG_CALLS", "true"),
            ("CADENCE_CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ]));
        assert_eq!(config.port, 9000);
        assert!(config.xai_api_key.is_none());
        assert!(config.log_calls);
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.is_production());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("PORT", "not-a-port"),
            ("XAI_TOKEN_BUDGET_DAILY", "lots"),
        ]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.token_budget_daily, DEFAULT_TOKEN_BUDGET_DAILY);
    }

    #[test]
    fn test_bind_addr() {
        let config = ApiConfig::default();
        assert!(config.bind_addr().is_ok());
        let bad = ApiConfig {
            bind_host: "not a host".to_string(),
            ..ApiConfig::default()
        };
        assert!(bad.bind_addr().is_err());
    }
}

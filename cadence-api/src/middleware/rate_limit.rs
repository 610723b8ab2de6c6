//! Inbound rate limiting.
//!
//! Bounds how fast a single caller can drive the service. This protects the
//! shared outbound quota from one noisy client; it does not replace the
//! governance layer, which still admits every outbound call.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use sha2::{Digest, Sha256};

use super::auth::bearer_token;
use crate::config::ApiConfig;
use crate::error::ApiError;

type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Key for rate limiting.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Hash of the bearer credential, never the credential itself
    Credential(String),
    /// Client address from proxy headers
    Ip(IpAddr),
    Anonymous,
}

impl RateLimitKey {
    pub fn from_request(request: &Request) -> Self {
        if let Some(token) = bearer_token(request.headers()) {
            let digest = Sha256::digest(token.as_bytes());
            return RateLimitKey::Credential(hex::encode(&digest[..16]));
        }
        match client_ip(request) {
            Some(ip) => RateLimitKey::Ip(ip),
            None => RateLimitKey::Anonymous,
        }
    }
}

fn client_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        if let Ok(ip) = first.trim().parse() {
            return Some(ip);
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// State for rate limiting middleware.
#[derive(Clone)]
pub struct RateLimitState {
    enabled: bool,
    quota: Quota,
    per_minute: u32,
    limiters: Arc<DashMap<RateLimitKey, Arc<DirectRateLimiter>>>,
}

impl RateLimitState {
    pub fn new(config: &ApiConfig) -> Self {
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN);
        Self {
            enabled: config.rate_limit_enabled,
            quota: Quota::per_minute(per_minute).allow_burst(burst),
            per_minute: per_minute.get(),
            limiters: Arc::new(DashMap::new()),
        }
    }

    fn limiter(&self, key: &RateLimitKey) -> Arc<DirectRateLimiter> {
        self.limiters
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone()
    }

    /// Seconds to wait, or `None` when the request may proceed.
    pub fn check(&self, key: &RateLimitKey) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        match self.limiter(key).check() {
            Ok(()) => None,
            Err(not_until) => Some(
                not_until
                    .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                    .as_secs()
                    .max(1),
            ),
        }
    }
}

/// Error type for rate limit middleware.
#[derive(Debug, thiserror::Error)]
#[error("Inbound rate limit exceeded, retry after {retry_after}s")]
pub struct RateLimitError {
    /// Seconds until the caller may retry
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        ApiError::too_many_requests(self.retry_after).into_response()
    }
}

/// Rate limiting middleware.
///
/// Rejected requests get 429 with `Retry-After`; allowed responses carry
/// `x-ratelimit-limit`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    let key = RateLimitKey::from_request(&request);
    if let Some(retry_after) = state.check(&key) {
        tracing::debug!(?key, retry_after, "Inbound request rate limited");
        return Err(RateLimitError { retry_after });
    }

    let mut response = next.run(request).await;
    if state.enabled {
        if let Ok(value) = HeaderValue::from_str(&state.per_minute.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-ratelimit-limit"), value);
        }
    }
    Ok(response)
}

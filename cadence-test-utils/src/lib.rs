//! Cadence Test Utilities
//!
//! Shared test infrastructure for the Cadence workspace:
//! - Scripted social API fake that records every physical call
//! - Mock draft provider
//! - Fixtures for governance configs and write-cap headers
//! - Proptest generators
//! - Custom assertions for the governance error taxonomy

pub use cadence_core::{
    CadenceError, CadenceResult, GovernanceConfig, GovernanceError, HeaderSnapshot, LimitScope,
};
pub use cadence_guard::{Governor, RemoteFailure, RemoteResponse, RemoteResult, SocialApi};
pub use cadence_storage::MemoryLedger;

use async_trait::async_trait;
use cadence_guard::TimelineFilter;
use cadence_llm::{DraftOptions, DraftProvider, DraftRequest};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// SCRIPTED SOCIAL API
// ============================================================================

/// One physical call made against [`ScriptedSocialApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    UserByUsername {
        username: String,
    },
    UserTimeline {
        user_id: String,
        filter: TimelineFilter,
    },
    SearchRecent {
        query: String,
    },
    PostReply {
        in_reply_to_id: String,
        text: String,
    },
}

impl RecordedCall {
    pub fn is_write(&self) -> bool {
        matches!(self, RecordedCall::PostReply { .. })
    }
}

#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<RemoteResult>,
    fallback: Option<RemoteResult>,
}

impl Script {
    fn next(&mut self, default: impl FnOnce() -> RemoteResult) -> RemoteResult {
        self.queued
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(default)
    }
}

/// In-process fake of the social network API.
///
/// Each operation has its own script: queued results are consumed in order,
/// then the fallback (if set) repeats, then a plausible default is returned.
#[derive(Debug, Default)]
pub struct ScriptedSocialApi {
    users: Mutex<Script>,
    timelines: Mutex<Script>,
    searches: Mutex<Script>,
    posts: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
    physical_calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedSocialApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn push_user(&self, result: RemoteResult) {
        lock(&self.users).queued.push_back(result);
    }

    pub fn push_timeline(&self, result: RemoteResult) {
        lock(&self.timelines).queued.push_back(result);
    }

    pub fn push_search(&self, result: RemoteResult) {
        lock(&self.searches).queued.push_back(result);
    }

    pub fn push_post(&self, result: RemoteResult) {
        lock(&self.posts).queued.push_back(result);
    }

    pub fn always_post(&self, result: RemoteResult) {
        lock(&self.posts).fallback = Some(result);
    }

    pub fn always_user(&self, result: RemoteResult) {
        lock(&self.users).fallback = Some(result);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn physical_calls(&self) -> usize {
        self.physical_calls.load(Ordering::SeqCst)
    }

    pub fn post_calls(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_write()).count()
    }

    async fn record(&self, call: RecordedCall) {
        self.physical_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.calls).push(call);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl SocialApi for ScriptedSocialApi {
    async fn user_by_username(&self, _token: &str, username: &str) -> RemoteResult {
        self.record(RecordedCall::UserByUsername {
            username: username.to_string(),
        })
        .await;
        lock(&self.users).next(|| Ok(fixtures::user_response("42", username)))
    }

    async fn user_timeline(
        &self,
        _token: &str,
        user_id: &str,
        filter: TimelineFilter,
        _max_results: u32,
    ) -> RemoteResult {
        self.record(RecordedCall::UserTimeline {
            user_id: user_id.to_string(),
            filter,
        })
        .await;
        lock(&self.timelines).next(|| Ok(fixtures::timeline_response(&["1001"])))
    }

    async fn search_recent(&self, _token: &str, query: &str, _max_results: u32) -> RemoteResult {
        self.record(RecordedCall::SearchRecent {
            query: query.to_string(),
        })
        .await;
        lock(&self.searches).next(|| Ok(fixtures::timeline_response(&["2001"])))
    }

    async fn post_reply(&self, _token: &str, in_reply_to_id: &str, text: &str) -> RemoteResult {
        self.record(RecordedCall::PostReply {
            in_reply_to_id: in_reply_to_id.to_string(),
            text: text.to_string(),
        })
        .await;
        lock(&self.posts).next(|| Ok(fixtures::post_response("9001", text)))
    }
}

// ============================================================================
// MOCK DRAFT PROVIDER
// ============================================================================

/// Draft provider returning canned options and counting calls.
#[derive(Debug, Default)]
pub struct MockDraftProvider {
    calls: AtomicUsize,
    failure: Mutex<Option<CadenceError>>,
    delay: Option<Duration>,
}

impl MockDraftProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Every subsequent call fails with `error`.
    pub fn fail_with(&self, error: CadenceError) {
        *lock(&self.failure) = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DraftProvider for MockDraftProvider {
    async fn draft_replies(&self, request: &DraftRequest) -> CadenceResult<DraftOptions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }
        let options = (1..=request.n)
            .map(|i| format!("Draft {} for: {}", i, request.tweet_text))
            .collect();
        Ok(DraftOptions { options })
    }

    fn provider_id(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configs, headers and provider payloads.

    use super::*;
    use cadence_core::{
        BreakerConfig, CacheSettings, LedgerSettings, ReservoirConfig, USER_24H_LIMIT,
        USER_24H_REMAINING, USER_24H_RESET, RATE_LIMIT_RESET,
    };

    /// Governance config with generous quotas, no spacing, short timeouts
    /// and an in-memory ledger.
    pub fn test_governance_config() -> GovernanceConfig {
        let reservoir = |capacity, max_concurrent| ReservoirConfig {
            capacity,
            refill_interval: Duration::from_secs(60),
            max_concurrent,
            min_spacing: Duration::ZERO,
            max_wait: None,
        };
        GovernanceConfig {
            reads: reservoir(100, 8),
            writes: reservoir(100, 4),
            breaker: BreakerConfig {
                error_threshold_pct: 50,
                cooldown: Duration::from_millis(500),
                rolling_window: Duration::from_secs(10),
                min_calls: 4,
                call_timeout: Duration::from_secs(2),
            },
            cache: CacheSettings {
                ttl: Duration::from_secs(30),
                max_entries: 100,
            },
            ledger: LedgerSettings {
                path: None,
                max_size_mb: 8,
            },
            write_cap_safety_margin_ms: 1_000,
        }
    }

    /// Governor over [`test_governance_config`] with a fresh memory ledger.
    pub fn test_governor() -> Governor {
        Governor::new(&test_governance_config(), Arc::new(MemoryLedger::new()))
    }

    pub fn write_cap_headers(remaining: i64, limit: i64, reset_epoch: i64) -> HeaderSnapshot {
        HeaderSnapshot::new()
            .with(USER_24H_REMAINING, remaining.to_string())
            .with(USER_24H_LIMIT, limit.to_string())
            .with(USER_24H_RESET, reset_epoch.to_string())
    }

    pub fn rate_limit_reset_headers(reset_epoch: i64) -> HeaderSnapshot {
        HeaderSnapshot::new().with(RATE_LIMIT_RESET, reset_epoch.to_string())
    }

    pub fn user_response(id: &str, username: &str) -> RemoteResponse {
        RemoteResponse::ok(json!({
            "data": {
                "id": id,
                "username": username.trim_start_matches('@'),
                "name": "Test User",
            }
        }))
    }

    pub fn timeline_response(ids: &[&str]) -> RemoteResponse {
        let data: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "text": format!("post {}", id)}))
            .collect();
        RemoteResponse::ok(json!({ "data": data }))
    }

    pub fn empty_timeline() -> RemoteResponse {
        RemoteResponse::ok(json!({ "meta": { "result_count": 0 } }))
    }

    pub fn post_response(id: &str, text: &str) -> RemoteResponse {
        RemoteResponse {
            status: 201,
            body: json!({ "data": { "id": id, "text": text } }),
            headers: HeaderSnapshot::new(),
        }
    }

    pub fn rate_limited(headers: HeaderSnapshot) -> RemoteFailure {
        RemoteFailure::new(429, "Too Many Requests").with_headers(headers)
    }

    pub fn server_error() -> RemoteFailure {
        RemoteFailure::new(503, "Service Unavailable")
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for governance inputs.

    use proptest::prelude::*;

    /// Usernames as typed by a user, sometimes with a leading `@`.
    pub fn arb_username() -> impl Strategy<Value = String> {
        ("[a-zA-Z0-9_]{1,15}", any::<bool>())
            .prop_map(|(name, at)| if at { format!("@{}", name) } else { name })
    }

    /// Numeric post ids.
    pub fn arb_post_id() -> impl Strategy<Value = String> {
        "[1-9][0-9]{5,18}"
    }

    /// Non-blank reply text with optional surrounding whitespace.
    pub fn arb_reply_text() -> impl Strategy<Value = String> {
        ("[ \t]{0,3}", "[a-zA-Z0-9][a-zA-Z0-9 .,!?]{0,199}", "[ \t\n]{0,3}")
            .prop_map(|(lead, body, trail)| format!("{}{}{}", lead, body, trail))
    }

    /// Header values as the provider might send them, including garbage.
    pub fn arb_header_value() -> impl Strategy<Value = String> {
        prop_oneof![
            (0i64..10_000).prop_map(|n| n.to_string()),
            (1_700_000_000i64..1_900_000_000).prop_map(|n| n.to_string()),
            "[a-z]{1,6}",
            Just(String::new()),
        ]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the governance error taxonomy.

    use super::*;

    /// Assert a governed result is a rate limit in `scope`.
    #[track_caller]
    pub fn assert_rate_limited<T: std::fmt::Debug>(
        result: &Result<T, GovernanceError>,
        scope: LimitScope,
    ) {
        match result {
            Err(GovernanceError::RateLimited { scope: s, .. }) => {
                assert_eq!(*s, scope, "Wrong rate-limit scope");
            }
            other => panic!("Expected RateLimited({:?}), got: {:?}", scope, other),
        }
    }

    /// Same as [`assert_rate_limited`] for results carrying the master error.
    #[track_caller]
    pub fn assert_cadence_rate_limited<T: std::fmt::Debug>(
        result: &CadenceResult<T>,
        scope: LimitScope,
    ) {
        match result {
            Err(CadenceError::Governance(GovernanceError::RateLimited { scope: s, .. })) => {
                assert_eq!(*s, scope, "Wrong rate-limit scope");
            }
            other => panic!("Expected RateLimited({:?}), got: {:?}", scope, other),
        }
    }

    #[track_caller]
    pub fn assert_circuit_open<T: std::fmt::Debug>(result: &Result<T, GovernanceError>) {
        match result {
            Err(GovernanceError::CircuitOpen { .. }) => {}
            other => panic!("Expected CircuitOpen, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_upstream<T: std::fmt::Debug>(
        result: &Result<T, GovernanceError>,
        status: Option<u16>,
    ) {
        match result {
            Err(GovernanceError::Upstream { status: s, .. }) => {
                assert_eq!(*s, status, "Wrong upstream status");
            }
            other => panic!("Expected Upstream({:?}), got: {:?}", status, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_order_then_default() {
        let api = ScriptedSocialApi::new();
        api.push_post(Err(fixtures::server_error()));

        let first = api.post_reply("t", "1", "hi").await;
        let second = api.post_reply("t", "1", "hi").await;

        assert_eq!(first, Err(fixtures::server_error()));
        assert_eq!(second.map(|r| r.status), Ok(201));
        assert_eq!(api.post_calls(), 2);
    }

    #[tokio::test]
    async fn test_fallback_repeats() {
        let api = ScriptedSocialApi::new();
        api.always_user(Err(RemoteFailure::new(401, "expired")));
        for _ in 0..3 {
            assert!(api.user_by_username("t", "a").await.is_err());
        }
        assert_eq!(api.physical_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_draft_provider() -> CadenceResult<()> {
        let provider = MockDraftProvider::new();
        let drafts = provider.draft_replies(&DraftRequest::new("gm")).await?;
        assert_eq!(drafts.options.len(), 3);
        assert_eq!(provider.calls(), 1);
        Ok(())
    }

    #[test]
    fn test_config_is_valid() {
        assert!(fixtures::test_governance_config().validate().is_ok());
    }
}

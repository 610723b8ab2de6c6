//! Social Read Routes
//!
//! Governed reads against the social network: resolve a username, fetch a
//! user's latest post, and search a hashtag. Every call goes through the
//! read path (read lockout, cache, coalescer, read scheduler, breaker).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use cadence_core::GovernanceError;
use cadence_guard::{ReadOutcome, RemoteResponse, RemoteResult, SocialApi, TimelineFilter};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    middleware::Credential,
    state::AppState,
    telemetry::metrics,
};

/// Posts fetched per cascade step.
const LATEST_PAGE_SIZE: u32 = 5;
/// Provider minimum for recent search.
const SEARCH_PAGE_SIZE: u32 = 10;

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

/// Strip one leading `@`; an empty result is a missing username.
pub fn normalize_username(raw: &str) -> ApiResult<String> {
    let trimmed = raw.trim();
    let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
    if name.is_empty() {
        return Err(ApiError::missing_field("username"));
    }
    Ok(name.to_string())
}

fn governed(result: Result<ReadOutcome, GovernanceError>) -> ApiResult<ReadOutcome> {
    if let Some(metrics) = metrics() {
        match &result {
            Ok(outcome) => metrics.record_cache_lookup(outcome.cached),
            Err(e) => metrics.record_rejection(e),
        }
    }
    result.map_err(ApiError::from)
}

// ============================================================================
// REMOTE OPERATIONS
// ============================================================================

async fn fetch_user(social: Arc<dyn SocialApi>, token: String, username: String) -> RemoteResult {
    let mut response = social.user_by_username(&token, &username).await?;
    response.body = response.body.get("data").cloned().unwrap_or(Value::Null);
    Ok(response)
}

fn first_post(body: &Value) -> Option<Value> {
    body.get("data")
        .and_then(Value::as_array)
        .and_then(|posts| posts.first())
        .cloned()
}

/// Originals first, then with replies, then anything.
async fn fetch_latest(social: Arc<dyn SocialApi>, token: String, user_id: String) -> RemoteResult {
    let mut latest = RemoteResponse::ok(Value::Null);
    for filter in TimelineFilter::CASCADE {
        let response = social
            .user_timeline(&token, &user_id, filter, LATEST_PAGE_SIZE)
            .await?;
        if let Some(post) = first_post(&response.body) {
            return Ok(RemoteResponse {
                body: post,
                ..response
            });
        }
        latest.headers = response.headers;
    }
    Ok(latest)
}

/// At most one result, to keep reads cheap.
async fn search_first(social: Arc<dyn SocialApi>, token: String, query: String) -> RemoteResult {
    let mut response = social
        .search_recent(&token, &query, SEARCH_PAGE_SIZE)
        .await?;
    let first: Vec<Value> = first_post(&response.body).into_iter().collect();
    response.body = Value::Array(first);
    Ok(response)
}

async fn resolve_user(
    state: &AppState,
    credential: &Credential,
    username: &str,
) -> ApiResult<ReadOutcome> {
    let social = Arc::clone(&state.social);
    let token = credential.token().to_string();
    let name = username.to_string();
    let key = format!("resolve:@{}", username);
    governed(
        state
            .governor
            .read("user_by_username", &key, move || fetch_user(social, token, name))
            .await,
    )
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/social/resolve?username=
pub async fn resolve(
    State(state): State<AppState>,
    credential: Credential,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<Value>> {
    let username = normalize_username(&query.username)?;
    let outcome = resolve_user(&state, &credential, &username).await?;
    Ok(Json(json!({
        "ok": true,
        "data": outcome.value,
        "cached": outcome.cached,
    })))
}

/// GET /api/social/latest?username=
pub async fn latest(
    State(state): State<AppState>,
    credential: Credential,
    Query(query): Query<UsernameQuery>,
) -> ApiResult<Json<Value>> {
    let username = normalize_username(&query.username)?;
    let user = resolve_user(&state, &credential, &username).await?;
    let user_id = user
        .value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::not_found(format!("User @{} not found", username)))?;

    let social = Arc::clone(&state.social);
    let token = credential.token().to_string();
    let key = format!("latest:@{}", username);
    let outcome = governed(
        state
            .governor
            .read("user_timeline", &key, move || fetch_latest(social, token, user_id))
            .await,
    )?;

    Ok(Json(json!({
        "ok": true,
        "latest": outcome.value,
        "cached": outcome.cached,
    })))
}

/// GET /api/social/search?q=#tag
pub async fn search(
    State(state): State<AppState>,
    credential: Credential,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Value>> {
    let q = query.q.trim().to_string();
    if !q.starts_with('#') || q.len() < 2 {
        return Err(ApiError::invalid_input("q must be a #tag"));
    }

    let social = Arc::clone(&state.social);
    let token = credential.token().to_string();
    let key = format!("search:{}", q);
    let outcome = governed(
        state
            .governor
            .read("search_recent", &key, move || search_first(social, token, q))
            .await,
    )?;

    Ok(Json(json!({
        "ok": true,
        "data": outcome.value,
        "cached": outcome.cached,
    })))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/resolve", get(resolve))
        .route("/latest", get(latest))
        .route("/search", get(search))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_username() -> ApiResult<()> {
        assert_eq!(normalize_username("@jack")?, "jack");
        assert_eq!(normalize_username(" jack ")?, "jack");
        assert!(normalize_username("@").is_err());
        assert!(normalize_username("").is_err());
        Ok(())
    }

    #[test]
    fn test_first_post() {
        let body = json!({"data": [{"id": "1"}, {"id": "2"}]});
        assert_eq!(first_post(&body), Some(json!({"id": "1"})));
        assert_eq!(first_post(&json!({"meta": {"result_count": 0}})), None);
        assert_eq!(first_post(&json!({"data": []})), None);
    }
}

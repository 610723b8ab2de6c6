//! Reply Routes
//!
//! Posting goes through the governed write path, so a repeated intent is
//! deduplicated and a locked write cap rejects before any remote call.
//! Draft generation is coalesced per identical request and bounded by the
//! daily token budget.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use cadence_core::{CadenceError, GovernanceError, LlmError, ValidationError};
use cadence_guard::{RemoteResult, SocialApi, WriteOutcome};
use cadence_llm::DraftRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    middleware::Credential,
    state::AppState,
    telemetry::metrics,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostReplyRequest {
    #[serde(default)]
    pub in_reply_to_tweet_id: String,
    #[serde(default)]
    pub text: String,
}

impl PostReplyRequest {
    /// Trimmed `(target, text)`, both required.
    pub fn validated(&self) -> Result<(String, String), ValidationError> {
        let target = self.in_reply_to_tweet_id.trim();
        let text = self.text.trim();
        if target.is_empty() || text.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "in_reply_to_tweet_id and text".to_string(),
            });
        }
        Ok((target.to_string(), text.to_string()))
    }
}

async fn post_reply(
    social: Arc<dyn SocialApi>,
    token: String,
    target: String,
    text: String,
) -> RemoteResult {
    social.post_reply(&token, &target, &text).await
}

fn record_write(write_locked: bool, result: &Result<WriteOutcome, CadenceError>) {
    let Some(metrics) = metrics() else {
        return;
    };
    match result {
        Ok(outcome) if outcome.is_deduped() => metrics.record_write_dedupe("post_reply"),
        Ok(_) => {}
        Err(CadenceError::Governance(e)) => metrics.record_rejection(e),
        Err(_) => {}
    }
    metrics.set_write_locked(write_locked);
}

/// POST /api/replies/post
pub async fn post_handler(
    State(state): State<AppState>,
    credential: Credential,
    Json(request): Json<PostReplyRequest>,
) -> ApiResult<Json<Value>> {
    let (target, text) = request.validated()?;

    let social = Arc::clone(&state.social);
    let token = credential.token().to_string();
    let op_target = target.clone();
    let op_text = text.clone();
    let result = state
        .governor
        .write(&target, &text, move || {
            post_reply(social, token, op_target, op_text)
        })
        .await;
    record_write(state.governor.write_cap().is_locked(), &result);

    match result? {
        WriteOutcome::Posted { response, .. } => Ok(Json(json!({
            "ok": true,
            "deduped": false,
            "data": response.body,
        }))),
        WriteOutcome::Deduped { .. } => Ok(Json(json!({
            "ok": true,
            "deduped": true,
        }))),
    }
}

/// POST /api/replies/generate
pub async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<DraftRequest>,
) -> ApiResult<Json<Value>> {
    request.validate()?;
    let provider = state
        .drafts
        .clone()
        .ok_or_else(|| ApiError::from(LlmError::ProviderNotConfigured))?;
    state.token_budget.check(&request)?;

    let key = request.coalescing_key();
    let options = state
        .draft_flights
        .once(&key, move || async move {
            Ok::<_, GovernanceError>(provider.draft_replies(&request).await)
        })
        .await??;

    Ok(Json(json!({
        "ok": true,
        "options": options.options,
    })))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/post", post(post_handler))
        .route("/generate", post(generate_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_trims() -> Result<(), ValidationError> {
        let request = PostReplyRequest {
            in_reply_to_tweet_id: " 123 ".to_string(),
            text: "  hello  ".to_string(),
        };
        assert_eq!(request.validated()?, ("123".to_string(), "hello".to_string()));
        Ok(())
    }

    #[test]
    fn test_validated_requires_both() {
        let blank_text = PostReplyRequest {
            in_reply_to_tweet_id: "123".to_string(),
            text: "   ".to_string(),
        };
        assert!(blank_text.validated().is_err());
        assert!(PostReplyRequest::default().validated().is_err());
    }

    #[test]
    fn test_missing_fields_deserialize() -> Result<(), serde_json::Error> {
        let request: PostReplyRequest = serde_json::from_str(r#"{"text":"hi"}"#)?;
        assert!(request.in_reply_to_tweet_id.is_empty());
        Ok(())
    }
}

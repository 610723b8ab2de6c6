//! Cadence LLM - Reply Drafting
//!
//! Provider-agnostic trait for generating reply drafts, plus the request
//! model, the coalescing key and the token budget check. The xAI
//! implementation lives in [`providers::xai`].

pub mod providers;

use async_trait::async_trait;
use cadence_core::{CadenceResult, LlmError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use providers::xai::{XaiClient, XaiDraftProvider};

/// Default number of drafts requested.
pub const DEFAULT_DRAFT_COUNT: u32 = 3;
/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Fixed allowance for the prompt scaffold and the completion.
pub const PROMPT_TOKEN_ALLOWANCE: i64 = 1_000;

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// A request for reply drafts to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub tweet_text: String,
    /// Free-form tone/style guidance.
    #[serde(default)]
    pub persona: Option<Value>,
    #[serde(default = "default_count")]
    pub n: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_count() -> u32 {
    DEFAULT_DRAFT_COUNT
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl DraftRequest {
    pub fn new(tweet_text: impl Into<String>) -> Self {
        Self {
            tweet_text: tweet_text.into(),
            persona: None,
            n: DEFAULT_DRAFT_COUNT,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_persona(mut self, persona: Value) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tweet_text.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "tweet_text".to_string(),
            });
        }
        if self.n == 0 {
            return Err(ValidationError::InvalidValue {
                field: "n".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "temperature".to_string(),
                reason: "must be within 0.0..=2.0".to_string(),
            });
        }
        Ok(())
    }

    fn persona_json(&self) -> Option<String> {
        self.persona
            .as_ref()
            .filter(|p| !p.is_null())
            .map(|p| p.to_string())
    }

    /// Rough token estimate: characters of post and persona plus a fixed
    /// allowance.
    pub fn approximate_tokens(&self) -> i64 {
        let persona_len = self.persona_json().map(|p| p.len()).unwrap_or(0);
        self.tweet_text.len() as i64 + persona_len as i64 + PROMPT_TOKEN_ALLOWANCE
    }

    /// Coalescing key: identical requests in flight share one completion.
    pub fn coalescing_key(&self) -> String {
        let canonical = serde_json::json!({
            "t": self.tweet_text,
            "p": self.persona.clone().unwrap_or(Value::Null),
            "n": self.n,
            "temperature": self.temperature,
        });
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        format!("gen:{}", hex::encode(digest))
    }

    pub fn system_prompt(&self) -> &'static str {
        "You are an expert at drafting concise, context-aware, engaging X replies under 240 \
         characters. Use advanced reasoning to align with the original post's intent and \
         provided tone guidance. Avoid spam or repetitive phrasing."
    }

    pub fn user_prompt(&self) -> String {
        let persona = self
            .persona_json()
            .map(|p| format!("Tone/Style Guidance: {}", p))
            .unwrap_or_default();
        format!(
            "{}\n\nOriginal Post:\n{}\n\nDraft {} distinct reply options as JSON: {{\"options\":[\"...\"]}}",
            persona, self.tweet_text, self.n
        )
    }
}

/// Generated reply drafts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftOptions {
    pub options: Vec<String>,
}

impl DraftOptions {
    /// Parse a completion's JSON content.
    ///
    /// Content that is not JSON is an error. A missing or non-array
    /// `options` field yields no drafts; non-string entries are skipped.
    pub fn from_completion(provider: &str, content: &str) -> Result<Self, LlmError> {
        let parsed: Value =
            serde_json::from_str(content).map_err(|e| LlmError::InvalidResponse {
                provider: provider.to_string(),
                reason: format!("Invalid JSON in completion: {}", e),
            })?;
        let options = parsed
            .get("options")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { options })
    }
}

// ============================================================================
// BUDGET
// ============================================================================

/// Token ceiling applied to each generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    pub daily: i64,
}

impl TokenBudget {
    pub fn new(daily: i64) -> Self {
        Self { daily }
    }

    pub fn check(&self, request: &DraftRequest) -> Result<(), LlmError> {
        let requested = request.approximate_tokens();
        if requested > self.daily {
            tracing::warn!(requested, budget = self.daily, "Draft request over token budget");
            return Err(LlmError::BudgetExceeded {
                requested,
                budget: self.daily,
            });
        }
        Ok(())
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// A remote model that drafts replies.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait DraftProvider: Send + Sync {
    async fn draft_replies(&self, request: &DraftRequest) -> CadenceResult<DraftOptions>;

    /// Provider identifier (e.g., "xai").
    fn provider_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_json() -> Result<(), serde_json::Error> {
        let request: DraftRequest = serde_json::from_value(json!({"tweet_text": "hello"}))?;
        assert_eq!(request.n, 3);
        assert!((request.temperature - 0.7).abs() < f64::EPSILON);
        assert!(request.persona.is_none());
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(DraftRequest::new("  ").validate().is_err());
        assert!(DraftRequest::new("hi").validate().is_ok());
        let mut hot = DraftRequest::new("hi");
        hot.temperature = 3.5;
        assert!(hot.validate().is_err());
    }

    #[test]
    fn test_approximate_tokens() {
        let plain = DraftRequest::new("12345");
        assert_eq!(plain.approximate_tokens(), 1_005);

        let with_persona = DraftRequest::new("12345").with_persona(json!({"tone": "dry"}));
        assert_eq!(
            with_persona.approximate_tokens(),
            1_005 + r#"{"tone":"dry"}"#.len() as i64
        );
    }

    #[test]
    fn test_budget() {
        let request = DraftRequest::new("x".repeat(100));
        assert!(TokenBudget::new(2_000).check(&request).is_ok());
        assert_eq!(
            TokenBudget::new(1_050).check(&request),
            Err(LlmError::BudgetExceeded {
                requested: 1_100,
                budget: 1_050,
            })
        );
    }

    #[test]
    fn test_coalescing_key() {
        let a = DraftRequest::new("post");
        let b = DraftRequest::new("post");
        assert_eq!(a.coalescing_key(), b.coalescing_key());
        assert!(a.coalescing_key().starts_with("gen:"));

        let mut c = DraftRequest::new("post");
        c.n = 4;
        assert_ne!(a.coalescing_key(), c.coalescing_key());
        let d = DraftRequest::new("post").with_persona(json!("witty"));
        assert_ne!(a.coalescing_key(), d.coalescing_key());
    }

    #[test]
    fn test_parse_options() {
        let parsed = DraftOptions::from_completion("xai", r#"{"options":["a","b",3]}"#)
            .expect("valid completion");
        assert_eq!(parsed.options, vec!["a".to_string(), "b".to_string()]);

        let empty = DraftOptions::from_completion("xai", r#"{"drafts":[]}"#).expect("valid");
        assert!(empty.options.is_empty());

        assert!(matches!(
            DraftOptions::from_completion("xai", "not json"),
            Err(LlmError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_user_prompt_mentions_count_and_persona() {
        let prompt = DraftRequest::new("the post")
            .with_persona(json!({"tone": "warm"}))
            .user_prompt();
        assert!(prompt.contains("Draft 3 distinct reply options"));
        assert!(prompt.contains("Tone/Style Guidance"));
        assert!(prompt.contains("the post"));
    }

    proptest! {
        #[test]
        fn prop_budget_admits_iff_estimate_fits(text in ".{0,300}", daily in 0i64..2_000) {
            let request = DraftRequest::new(text);
            let fits = request.approximate_tokens() <= daily;
            prop_assert_eq!(TokenBudget::new(daily).check(&request).is_ok(), fits);
        }

        #[test]
        fn prop_coalescing_key_tracks_text(a in "[a-z]{1,40}", b in "[a-z]{1,40}") {
            let same = DraftRequest::new(a.clone()).coalescing_key()
                == DraftRequest::new(b.clone()).coalescing_key();
            prop_assert_eq!(same, a == b);
        }
    }
}

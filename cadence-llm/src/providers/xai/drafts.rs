//! xAI reply-draft provider

use super::client::XaiClient;
use super::types::{CompletionRequest, CompletionResponse, Message, ResponseFormat};
use crate::{DraftOptions, DraftProvider, DraftRequest};
use async_trait::async_trait;
use cadence_core::CadenceResult;

pub const DEFAULT_XAI_MODEL: &str = "grok-4-0709";

/// Drafts replies with an xAI chat model in JSON mode.
#[derive(Debug)]
pub struct XaiDraftProvider {
    client: XaiClient,
    model: String,
}

impl XaiDraftProvider {
    pub fn new(client: XaiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &DraftRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(request.system_prompt()),
                Message::user(request.user_prompt()),
            ],
            temperature: Some(request.temperature),
            response_format: Some(ResponseFormat::json_object()),
        }
    }
}

#[async_trait]
impl DraftProvider for XaiDraftProvider {
    async fn draft_replies(&self, request: &DraftRequest) -> CadenceResult<DraftOptions> {
        let body = self.build_request(request);
        let response: CompletionResponse = self.client.request("chat/completions", &body).await?;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                total_tokens = usage.total_tokens,
                "Draft completion usage"
            );
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_else(|| "{}".to_string());

        Ok(DraftOptions::from_completion("xai", &content)?)
    }

    fn provider_id(&self) -> &str {
        "xai"
    }
}

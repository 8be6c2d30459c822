//! Answer composition: prompt, one model call with retry, reply parsing.

use std::sync::Arc;

use serde::Serialize;

use ragchat_core::chat::{ChatModel, ChatRequest};
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::models::ConversationTurn;
use ragchat_core::prompt::{build_prompt, PromptParams};
use ragchat_core::reply::{parse_reply, ActionIntent};

use crate::config::ChatConfig;
use crate::retry::{with_retry, RetryPolicy};

/// The assistant's answer for one turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub text: String,
    /// Source URIs of the context the answer was grounded in.
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<ActionIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

pub struct AnswerComposer {
    model: Arc<dyn ChatModel>,
    prompt: PromptParams,
    retry: RetryPolicy,
    max_tokens: u32,
    temperature: f32,
    enabled: bool,
}

impl AnswerComposer {
    pub fn new(model: Arc<dyn ChatModel>, prompt: PromptParams, retry: RetryPolicy) -> Self {
        Self {
            model,
            prompt,
            retry,
            max_tokens: 1500,
            temperature: 0.7,
            enabled: true,
        }
    }

    pub fn from_config(model: Arc<dyn ChatModel>, config: &ChatConfig) -> Self {
        let mut composer = Self::new(model, config.prompt_params(), config.retry.policy())
            .with_sampling(config.max_tokens, config.temperature);
        composer.enabled = config.provider != "disabled";
        composer
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Produce a reply for `query` grounded in `context`.
    ///
    /// `sources` are passed through unchanged; an empty context still
    /// yields an answer.
    pub async fn compose(
        &self,
        query: &str,
        context: &str,
        sources: &[String],
        history: &[ConversationTurn],
    ) -> RagResult<AssistantReply> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("message must not be empty".to_string()));
        }
        if !self.enabled {
            return Err(RagError::Config(
                "chat model is disabled; set [chat].provider".to_string(),
            ));
        }

        let prompt = build_prompt(&self.prompt, query, context, history)?;
        if prompt.context_truncated {
            tracing::warn!(
                window = self.prompt.context_window_chars,
                "retrieved context truncated to fit the prompt window"
            );
        }
        tracing::debug!(
            messages = prompt.messages.len(),
            history_used = prompt.history_used,
            prompt_chars = prompt.total_chars,
            "built prompt"
        );

        let request = ChatRequest {
            messages: prompt.messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let model = self.model.as_ref();
        let label = format!("chat:{}", model.model_name());
        let request = &request;
        let completion = with_retry(&self.retry, &label, move || model.complete(request))
            .await
            .map_err(|failure| RagError::ModelUnavailable {
                attempts: failure.attempts,
                detail: failure.error.to_string(),
            })?;

        let raw = completion.text.ok_or_else(|| {
            RagError::ModelResponseInvalid("model returned no message content".to_string())
        })?;
        let parsed = parse_reply(&raw, query)?;
        if let Some(intent) = &parsed.intent {
            tracing::info!(?intent, "reply carries an action intent");
        }

        Ok(AssistantReply {
            text: parsed.text,
            sources: sources.to_vec(),
            intent: parsed.intent,
            finish_reason: completion.finish_reason,
        })
    }
}

//! Chat model adapters.
//!
//! [`OpenAiChat`] speaks the OpenAI-compatible `POST /chat/completions`
//! protocol, which also covers most local servers (LM Studio, vLLM,
//! llama.cpp, Ollama's `/v1` shim). [`DisabledChat`] is used when
//! `chat.provider = "disabled"` and rejects every call.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragchat_core::chat::{ChatCompletion, ChatMessage, ChatModel, ChatRequest};
use ragchat_core::error::UpstreamError;

use crate::config::ChatConfig;
use crate::http::{build_client, send_json};

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Instantiate the chat model named by `config.provider`.
pub fn create_chat_model(config: &ChatConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAiChat::from_config(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, UpstreamError> {
        Err(UpstreamError::BadRequest(
            "chat provider is disabled; set [chat].provider".to_string(),
        ))
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completion client.
///
/// The bearer token comes from `OPENAI_API_KEY`; when it is unset the
/// request is sent without authorization, which local servers accept.
pub struct OpenAiChat {
    client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChat {
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("chat.model required for OpenAI provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() && url.starts_with(OPENAI_DEFAULT_URL) {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Self::new(url, api_key, model, config.timeout_secs)
    }

    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, UpstreamError> {
        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .json(&CompletionRequest {
                model: &self.model,
                messages: &request.messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
                stream: false,
            });
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response: CompletionResponse = send_json(http).await?;
        // No choices is treated like a choice without content.
        let Some(choice) = response.choices.into_iter().next() else {
            return Ok(ChatCompletion {
                text: None,
                finish_reason: None,
            });
        };
        Ok(ChatCompletion {
            text: choice.message.and_then(|m| m.content),
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_rejects() {
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
            temperature: 0.0,
        };
        let err = DisabledChat.complete(&req).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("q")];
        let body = serde_json::to_value(CompletionRequest {
            model: "m",
            messages: &messages,
            max_tokens: 5,
            temperature: 0.5,
            stream: false,
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "q");
        assert_eq!(body["max_tokens"], 5);
    }
}

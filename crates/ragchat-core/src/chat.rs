//! Chat model trait and message types.
//!
//! The answer composer talks to the external language model only through
//! [`ChatModel`]. Adapters map the provider's wire format into
//! [`ChatCompletion`] and classify failures as [`UpstreamError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A single chat-model invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Decoded model output. `text` is `None` when the provider returned no
/// content (e.g. a refusal or tool-call-only response).
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub text: Option<String>,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Perform exactly one upstream call.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, UpstreamError>;
}

//! HTTP embedding providers.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::error::UpstreamError;
use ragchat_core::models::EmbeddingVector;

use crate::config::EmbeddingConfig;
use crate::http::{build_client, send_json};

pub const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

// ============ OpenAI-compatible ============

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider for `POST {url}/embeddings` with bearer auth.
///
/// The API key is read from `OPENAI_API_KEY` at construction time.
pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());
        Self::new(url, api_key, model, dims, config.timeout_secs)
    }

    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dims: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, UpstreamError> {
        let request = self
            .client
            .post(format!("{}/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            });
        let mut response: OpenAiEmbeddingResponse = send_json(request).await?;
        // Order matches input only after sorting by index.
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ============ Ollama ============

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider for a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());
        Self::new(url, model, dims, config.timeout_secs)
    }

    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        dims: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, UpstreamError> {
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            });
        let response: OllamaEmbeddingResponse = send_json(request).await.map_err(|e| match e {
            UpstreamError::Network(msg) => UpstreamError::Network(format!(
                "is Ollama running at {}? {}",
                self.url, msg
            )),
            other => other,
        })?;
        Ok(response.embeddings)
    }
}

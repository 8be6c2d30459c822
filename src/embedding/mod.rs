//! Embedding providers and the batching, retrying [`EmbeddingClient`].
//!
//! Providers implement [`EmbeddingProvider`] and make exactly one upstream
//! call per batch:
//! - **[`DisabledProvider`]**: used when `embedding.provider = "disabled"`.
//! - **[`OpenAiEmbedder`]**: any OpenAI-compatible `POST /embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `POST /api/embed`.
//!
//! # Retry Strategy
//!
//! [`EmbeddingClient::embed`] splits its input into batches of at most
//! `batch_size` and sends them sequentially. Each batch is retried with
//! exponential backoff (see [`RetryPolicy`]):
//! - HTTP 429, 5xx, and network errors retry
//! - HTTP 401/403 and other 4xx fail immediately
//! - A response with the wrong number of vectors or the wrong dimension
//!   fails immediately
//!
//! Any failure surfaces as [`RagError::EmbeddingService`] carrying the
//! number of attempts made on the failing batch.

mod remote;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::error::{RagError, RagResult, UpstreamError};
use ragchat_core::models::EmbeddingVector;

use crate::config::EmbeddingConfig;
use crate::retry::{with_retry, RetryPolicy};

pub use remote::{OllamaEmbedder, OpenAiEmbedder};

/// Placeholder provider for `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<EmbeddingVector>, UpstreamError> {
        Err(UpstreamError::BadRequest(
            "embedding provider is disabled".to_string(),
        ))
    }
}

/// Instantiate the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::from_config(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::from_config(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Order-preserving, batching, retrying front end over a provider.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
    enabled: bool,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
            enabled: true,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        let mut client = Self::new(provider, config.batch_size, config.retry.policy());
        client.enabled = config.is_enabled();
        Ok(client)
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Embed `texts`, returning exactly one vector per input in input order.
    pub async fn embed(&self, texts: &[String]) -> RagResult<Vec<EmbeddingVector>> {
        if !self.enabled {
            return Err(RagError::Config(
                "embeddings are disabled; set [embedding].provider".to_string(),
            ));
        }

        let mut out = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            let vectors = self.embed_one_batch(batch).await.inspect_err(|e| {
                tracing::error!(batch = batch_no, size = batch.len(), error = %e, "embedding batch failed");
            })?;
            out.extend(vectors);
        }
        tracing::debug!(texts = texts.len(), model = self.model_name(), "embedded texts");
        Ok(out)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> RagResult<EmbeddingVector> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::EmbeddingService {
                attempts: 1,
                detail: "empty embedding response".to_string(),
            })
    }

    async fn embed_one_batch(&self, batch: &[String]) -> RagResult<Vec<EmbeddingVector>> {
        let provider = self.provider.as_ref();
        let label = format!("embed:{}", provider.model_name());

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&self.retry, &label, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            provider.embed_batch(batch)
        })
        .await;
        let attempts = calls.load(Ordering::Relaxed);

        let vectors = result.map_err(|failure| RagError::EmbeddingService {
            attempts: failure.attempts,
            detail: failure.error.to_string(),
        })?;

        if vectors.len() != batch.len() {
            return Err(RagError::EmbeddingService {
                attempts,
                detail: format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                ),
            });
        }
        let expected = provider.dims();
        if let Some(bad) = vectors
            .iter()
            .find(|v| v.is_empty() || (expected > 0 && v.len() != expected))
        {
            return Err(RagError::EmbeddingService {
                attempts,
                detail: format!(
                    "provider returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    expected
                ),
            });
        }
        if vectors.iter().flatten().any(|x| !x.is_finite()) {
            return Err(RagError::EmbeddingService {
                attempts,
                detail: "provider returned a vector with non-finite components".to_string(),
            });
        }
        Ok(vectors)
    }
}

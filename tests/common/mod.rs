//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ragchat::assistant::Assistant;
use ragchat::composer::AnswerComposer;
use ragchat::config::{Config, StoreBackend};
use ragchat::embedding::EmbeddingClient;
use ragchat::retry::RetryPolicy;
use ragchat_core::chat::{ChatCompletion, ChatModel, ChatRequest, Role};
use ragchat_core::embedding::EmbeddingProvider;
use ragchat_core::error::UpstreamError;
use ragchat_core::models::EmbeddingVector;
use ragchat_core::prompt::PromptParams;
use ragchat_core::store::memory::InMemoryStore;
use wiremock::{Request, Respond, ResponseTemplate};

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Three-dimensional embedding keyed on topic words: cats, dogs, other.
pub fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let cat = if lower.contains("cat") { 1.0 } else { 0.0 };
    let dog = if lower.contains("dog") { 1.0 } else { 0.0 };
    vec![cat, dog, 0.1]
}

/// In-process embedding provider with an adjustable delay.
#[derive(Default)]
pub struct TopicEmbedder {
    delay_ms: AtomicU64,
}

impl TopicEmbedder {
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, UpstreamError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(texts.iter().map(|t| topic_vector(t)).collect())
    }
}

/// Chat model that answers "You asked: <query>" and records every request.
#[derive(Default)]
pub struct EchoChat {
    pub seen: Mutex<Vec<ChatRequest>>,
}

impl EchoChat {
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for EchoChat {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, UpstreamError> {
        self.seen.lock().unwrap().push(request.clone());
        let query = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatCompletion {
            text: Some(format!("You asked: {}", query)),
            finish_reason: Some("stop".to_string()),
        })
    }
}

pub struct Harness {
    pub assistant: Arc<Assistant>,
    pub embedder: Arc<TopicEmbedder>,
    pub chat: Arc<EchoChat>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.db.backend = StoreBackend::Memory;
    config.chunking.chunk_size = 60;
    config.chunking.overlap = 10;
    config.retrieval.top_k = 3;
    config.retrieval.max_context_chars = 500;
    config
}

/// Route `tracing` output through the test harness (`RUST_LOG` to enable).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory assistant wired to the fakes above.
pub fn harness(config: Config) -> Harness {
    init_tracing();
    let embedder = Arc::new(TopicEmbedder::default());
    let chat = Arc::new(EchoChat::default());
    let client = EmbeddingClient::new(embedder.clone(), 16, fast_retry());
    let composer = AnswerComposer::new(
        chat.clone(),
        PromptParams {
            system_instructions: "You answer from the user's documents.".to_string(),
            history_turns: config.chat.history_turns,
            context_window_chars: config.chat.context_window_chars,
        },
        fast_retry(),
    );
    let assistant = Assistant::with_components(
        config,
        Arc::new(InMemoryStore::new()),
        client,
        composer,
    );
    Harness {
        assistant: Arc::new(assistant),
        embedder,
        chat,
    }
}

// ============ wiremock responders ============

fn inputs(request: &Request) -> Vec<String> {
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap_or_default();
    body["input"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Answers `POST /api/embed` like Ollama, using [`topic_vector`].
pub struct OllamaTopics;

impl Respond for OllamaTopics {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let embeddings: Vec<Vec<f32>> = inputs(request).iter().map(|t| topic_vector(t)).collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": embeddings }))
    }
}

/// Answers `POST /embeddings` like OpenAI, returning `data` in reverse
/// order so callers must sort by `index`.
pub struct OpenAiTopics;

impl Respond for OpenAiTopics {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let data: Vec<serde_json::Value> = inputs(request)
            .iter()
            .enumerate()
            .rev()
            .map(|(i, t)| serde_json::json!({ "index": i, "embedding": topic_vector(t) }))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

/// Chat completion body with a single assistant message.
pub fn completion(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

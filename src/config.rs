//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, see [`Config::default`]) yields a working local setup with the
//! embedding and chat providers disabled.
//!
//! ```toml
//! [db]
//! backend = "sqlite"
//! path = "./data/ragchat.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! overlap = 200
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [chat]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ragchat_core::chunk;
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::prompt::{PromptParams, DEFAULT_SYSTEM_PROMPT};

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("./data/ragchat.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_context_chars: usize,
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_chars: 6000,
            timeout_ms: 10_000,
        }
    }
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Shared retry knobs for embedding and chat calls.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Overrides the provider's default endpoint.
    pub url: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    #[serde(flatten)]
    pub retry: RetryConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            timeout_secs: 30,
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    /// `disabled` or `openai` (any OpenAI-compatible endpoint).
    pub provider: String,
    pub model: Option<String>,
    pub url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub history_turns: usize,
    pub context_window_chars: usize,
    pub timeout_secs: u64,
    pub system_prompt: Option<String>,
    #[serde(flatten)]
    pub retry: RetryConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_tokens: 1500,
            temperature: 0.7,
            history_turns: 5,
            context_window_chars: 24_000,
            timeout_secs: 60,
            system_prompt: None,
            retry: RetryConfig::default(),
        }
    }
}

impl ChatConfig {
    pub fn prompt_params(&self) -> PromptParams {
        PromptParams {
            system_instructions: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            history_turns: self.history_turns,
            context_window_chars: self.context_window_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_turns: usize,
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub request_timeout_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7340".to_string(),
            request_timeout_secs: 60,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Check cross-field constraints. Runs before any store or network
    /// resource is created.
    pub fn validate(&self) -> RagResult<()> {
        chunk::validate_params(self.chunking.chunk_size, self.chunking.overlap)?;

        if self.retrieval.top_k < 1 {
            return Err(RagError::Config("retrieval.top_k must be >= 1".into()));
        }
        if self.retrieval.max_context_chars < 1 {
            return Err(RagError::Config(
                "retrieval.max_context_chars must be >= 1".into(),
            ));
        }
        if self.retrieval.timeout_ms == 0 {
            return Err(RagError::Config("retrieval.timeout_ms must be > 0".into()));
        }

        match self.embedding.provider.as_str() {
            "disabled" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    return Err(RagError::Config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    )));
                }
                if matches!(self.embedding.dims, None | Some(0)) {
                    return Err(RagError::Config(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    )));
                }
            }
            other => {
                return Err(RagError::Config(format!(
                    "unknown embedding provider '{}': must be disabled, openai, or ollama",
                    other
                )))
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config("embedding.batch_size must be > 0".into()));
        }
        if self.embedding.retry.max_attempts == 0 {
            return Err(RagError::Config("embedding.max_attempts must be >= 1".into()));
        }

        match self.chat.provider.as_str() {
            "disabled" => {}
            "openai" => {
                if self.chat.model.is_none() {
                    return Err(RagError::Config(
                        "chat.model must be specified when provider is 'openai'".into(),
                    ));
                }
            }
            other => {
                return Err(RagError::Config(format!(
                    "unknown chat provider '{}': must be disabled or openai",
                    other
                )))
            }
        }
        if self.chat.retry.max_attempts == 0 {
            return Err(RagError::Config("chat.max_attempts must be >= 1".into()));
        }
        if self.chat.context_window_chars == 0 {
            return Err(RagError::Config("chat.context_window_chars must be > 0".into()));
        }
        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(RagError::Config("chat.temperature must be in [0.0, 2.0]".into()));
        }

        if self.session.max_turns == 0 {
            return Err(RagError::Config("session.max_turns must be > 0".into()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(RagError::Config(
                "server.request_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.validate()?;
    Ok(config)
}

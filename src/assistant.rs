//! The assistant: shared state plus the chat pipeline.
//!
//! An [`Assistant`] owns one vector store, one embedding client, the
//! retriever and composer built on them, the session store, and the
//! per-document write locks. The HTTP server and the CLI both drive it;
//! ingestion lives in [`crate::ingest`].
//!
//! A chat turn runs strictly in order: validate, lock the session, retrieve,
//! compose, append the turn. The whole turn is bounded by
//! `server.request_timeout_secs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use uuid::Uuid;

use ragchat_core::context::RetrievedContext;
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::models::ConversationTurn;
use ragchat_core::reply::ActionIntent;
use ragchat_core::store::memory::InMemoryStore;
use ragchat_core::store::{MetadataFilter, VectorStore};

use crate::composer::AnswerComposer;
use crate::config::{Config, StoreBackend};
use crate::embedding::EmbeddingClient;
use crate::llm::create_chat_model;
use crate::locks::DocumentLocks;
use crate::retriever::{RetrievalParams, Retriever};
use crate::session::SessionStore;
use crate::sqlite_store::SqliteStore;
use crate::turn::{TurnState, TurnTrace};

/// One chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Client-held history. When non-empty it replaces the session's own
    /// history in the prompt for this turn.
    pub history: Vec<ConversationTurn>,
    pub top_k: Option<usize>,
    pub filter: Option<MetadataFilter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutput {
    pub reply: String,
    pub sources: Vec<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<ActionIntent>,
    /// Set when retrieval timed out and the answer was composed without
    /// document context.
    pub retrieval_degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub store: &'static str,
}

pub struct Assistant {
    pub(crate) config: Config,
    pub(crate) store: Arc<dyn VectorStore>,
    pub(crate) embedder: Arc<EmbeddingClient>,
    pub(crate) retriever: Retriever,
    pub(crate) composer: AnswerComposer,
    pub(crate) sessions: SessionStore,
    pub(crate) locks: DocumentLocks,
}

impl Assistant {
    /// Build an assistant from configuration: open the configured store and
    /// create the embedding and chat providers.
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let store: Arc<dyn VectorStore> = match config.db.backend {
            StoreBackend::Sqlite => Arc::new(
                SqliteStore::open(&config.db)
                    .await
                    .with_context(|| format!("opening store at {}", config.db.path.display()))?,
            ),
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        };
        let embedder = EmbeddingClient::from_config(&config.embedding)?;
        let model = create_chat_model(&config.chat)?;
        let composer = AnswerComposer::from_config(model, &config.chat);

        tracing::info!(
            backend = ?config.db.backend,
            embedding = embedder.model_name(),
            chat = composer.model_name(),
            "assistant ready"
        );
        Ok(Self::with_components(config, store, embedder, composer))
    }

    /// Assemble an assistant from already-built parts.
    pub fn with_components(
        config: Config,
        store: Arc<dyn VectorStore>,
        embedder: EmbeddingClient,
        composer: AnswerComposer,
    ) -> Self {
        let embedder = Arc::new(embedder);
        let retriever = Retriever::new(embedder.clone(), store.clone(), config.retrieval.timeout());
        let sessions = SessionStore::new(
            config.session.max_turns,
            Duration::from_secs(config.session.ttl_secs),
        );
        Self {
            config,
            store,
            embedder,
            retriever,
            composer,
            sessions,
            locks: DocumentLocks::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn create_session(&self, user_id: Option<&str>) -> String {
        self.sessions.create(user_id)
    }

    /// Answer one message.
    pub async fn chat(&self, input: ChatInput) -> RagResult<ChatOutput> {
        let limit = self.config.server.request_timeout();
        let mut trace = TurnTrace::new(Uuid::new_v4().to_string());

        let outcome = tokio::time::timeout(limit, self.run_turn(input, &mut trace)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(timed_out(trace.state(), limit)),
        };
        match &result {
            Ok(_) => trace.complete(),
            Err(e) => trace.fail(&e.to_string()),
        }
        result
    }

    async fn run_turn(&self, input: ChatInput, trace: &mut TurnTrace) -> RagResult<ChatOutput> {
        let message = input.message.trim();
        if message.is_empty() {
            return Err(RagError::Validation("message must not be empty".to_string()));
        }
        let params = RetrievalParams {
            top_k: input.top_k.unwrap_or(self.config.retrieval.top_k),
            max_context_chars: self.config.retrieval.max_context_chars,
        };
        params.validate()?;

        let mut session = self
            .sessions
            .acquire(input.session_id.as_deref(), input.user_id.as_deref())
            .await;

        let (context, degraded) = match self
            .retriever
            .retrieve_traced(message, params, input.filter.as_ref(), Some(&mut *trace))
            .await
        {
            Ok(context) => (context, false),
            Err(RagError::RetrievalTimeout(ms)) => {
                tracing::warn!(
                    session = %session.id,
                    timeout_ms = ms,
                    "retrieval timed out, answering without document context"
                );
                (RetrievedContext::default(), true)
            }
            Err(e) => return Err(e),
        };

        trace.advance(TurnState::Composing);
        let history: &[ConversationTurn] = if input.history.is_empty() {
            &session.history
        } else {
            &input.history
        };
        let reply = self
            .composer
            .compose(message, &context.context, &context.citations, history)
            .await?;

        session.push_turn(ConversationTurn::new(message, &reply.text));
        tracing::info!(
            session = %session.id,
            sources = reply.sources.len(),
            degraded,
            "answered message"
        );

        Ok(ChatOutput {
            reply: reply.text,
            sources: reply.sources,
            session_id: session.id.clone(),
            intent: reply.intent,
            retrieval_degraded: degraded,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.store.health().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(error = %e, "store health check failed");
                "unavailable"
            }
        };
        HealthReport {
            status: if store == "ok" { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            store,
        }
    }
}

/// Error for a turn cut off by the request timeout, classified by the stage
/// it was in.
fn timed_out(state: TurnState, limit: Duration) -> RagError {
    match state {
        TurnState::Composing => RagError::ModelUnavailable {
            attempts: 0,
            detail: format!("request timed out after {} ms", limit.as_millis()),
        },
        _ => RagError::RetrievalTimeout(limit.as_millis() as u64),
    }
}

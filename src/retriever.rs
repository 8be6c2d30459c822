//! Query-time retrieval: embed, search, and assemble a bounded context.
//!
//! Parameters are validated before any network call. Embedding the query
//! and querying the store share one timeout; expiry yields
//! [`RagError::RetrievalTimeout`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use ragchat_core::context::{assemble_context, RetrievedContext};
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::store::{MetadataFilter, VectorStore};

use crate::embedding::EmbeddingClient;
use crate::turn::{TurnState, TurnTrace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub max_context_chars: usize,
}

impl RetrievalParams {
    pub fn validate(&self) -> RagResult<()> {
        if self.top_k < 1 {
            return Err(RagError::Config("top_k must be >= 1".to_string()));
        }
        if self.max_context_chars < 1 {
            return Err(RagError::Config(
                "max_context_chars must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Retriever {
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>, timeout: Duration) -> Self {
        Self {
            embedder,
            store,
            timeout,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        params: RetrievalParams,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<RetrievedContext> {
        self.retrieve_traced(query, params, filter, None).await
    }

    /// As [`retrieve`](Self::retrieve), advancing `trace` through the
    /// embedding and retrieving states.
    pub async fn retrieve_traced(
        &self,
        query: &str,
        params: RetrievalParams,
        filter: Option<&MetadataFilter>,
        mut trace: Option<&mut TurnTrace>,
    ) -> RagResult<RetrievedContext> {
        params.validate()?;
        if query.trim().is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }

        let started = Instant::now();
        let search = async {
            if let Some(t) = trace.as_deref_mut() {
                t.advance(TurnState::Embedding);
            }
            let query_vector = self.embedder.embed_query(query).await?;
            if let Some(t) = trace.as_deref_mut() {
                t.advance(TurnState::Retrieving);
            }
            self.store.query(&query_vector, params.top_k, filter).await
        };
        let candidates = tokio::time::timeout(self.timeout, search)
            .await
            .map_err(|_| RagError::RetrievalTimeout(self.timeout.as_millis() as u64))??;

        let context = assemble_context(&candidates, params.max_context_chars);
        tracing::debug!(
            candidates = candidates.len(),
            blocks = context.blocks.len(),
            context_chars = context.context.chars().count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieved context"
        );
        Ok(context)
    }
}

//! Vector store abstraction.
//!
//! The [`VectorStore`] trait defines every storage operation the ingestion
//! and retrieval pipeline needs, enabling pluggable backends (SQLite,
//! in-memory, or an adapter over a hosted vector-search service).
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`upsert`](VectorStore::upsert) | Idempotent by chunk id; replaced chunks keep their insertion position |
//! | [`commit_document`](VectorStore::commit_document) | Registers a document and all its chunks in one atomic step |
//! | [`query`](VectorStore::query) | Cosine similarity, descending; ties by insertion order |
//! | [`delete`](VectorStore::delete) | Removes a document and its chunks atomically w.r.t. queries |
//!
//! Every call is all-or-nothing: on failure the store is unchanged and no
//! partial results are returned.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::by_score_desc;
use crate::error::{RagError, RagResult};
use crate::models::{Chunk, Document, DocumentSummary, EmbeddingVector, RetrievalResult};

/// A chunk paired with its computed embedding, ready to persist.
pub type ChunkEntry = (Chunk, EmbeddingVector);

/// Metadata predicate applied to query candidates before ranking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataFilter {
    pub document_id: Option<String>,
    pub source_uri: Option<String>,
    /// Only documents uploaded strictly after this Unix timestamp (seconds).
    pub uploaded_after: Option<i64>,
}

impl MetadataFilter {
    pub fn matches(&self, document_id: &str, source_uri: &str, uploaded_at: i64) -> bool {
        if let Some(id) = &self.document_id {
            if id != document_id {
                return false;
            }
        }
        if let Some(uri) = &self.source_uri {
            if uri != source_uri {
                return false;
            }
        }
        if let Some(after) = self.uploaded_after {
            if uploaded_at <= after {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace chunk/vector pairs by chunk id. Every chunk's
    /// document must already be registered.
    async fn upsert(&self, entries: &[ChunkEntry]) -> RagResult<()>;

    /// Atomically register `doc`, drop any documents it supersedes (same
    /// `source_uri`, different id), and store all of its chunks.
    ///
    /// Returns the ids of superseded documents.
    async fn commit_document(&self, doc: &Document, entries: &[ChunkEntry])
        -> RagResult<Vec<String>>;

    /// Nearest-neighbour query. Only chunks with a stored vector are
    /// eligible.
    async fn query(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<RetrievalResult>>;

    /// Remove a document and every chunk it owns. Returns the number of
    /// chunks removed, or [`RagError::NotFound`] for an unknown id.
    async fn delete(&self, document_id: &str) -> RagResult<usize>;

    async fn get_document(&self, document_id: &str) -> RagResult<Option<Document>>;

    /// All documents, most recently uploaded first.
    async fn list_documents(&self) -> RagResult<Vec<DocumentSummary>>;

    /// Cheap reachability probe.
    async fn health(&self) -> RagResult<()>;
}

/// A scored candidate plus the insertion sequence used for tie-breaking.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub seq: u64,
    pub result: RetrievalResult,
}

/// Sort candidates by descending score, then ascending insertion sequence,
/// and keep the first `top_k`.
pub fn rank_candidates(mut candidates: Vec<RankedCandidate>, top_k: usize) -> Vec<RetrievalResult> {
    candidates.sort_by(|a, b| {
        by_score_desc(a.result.score, b.result.score).then(a.seq.cmp(&b.seq))
    });
    candidates.truncate(top_k);
    candidates.into_iter().map(|c| c.result).collect()
}

/// Validate a batch of entries before any write.
///
/// All vectors must be non-empty, finite, and share one dimension, which must also
/// match `established_dims` when the store already holds vectors. Returns
/// the batch dimension (or `None` for an empty batch).
pub fn check_entries(
    entries: &[ChunkEntry],
    established_dims: Option<usize>,
) -> RagResult<Option<usize>> {
    let mut dims = established_dims;
    for (chunk, vector) in entries {
        if vector.is_empty() {
            return Err(RagError::Validation(format!(
                "chunk {} has an empty embedding vector",
                chunk.id
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(RagError::Validation(format!(
                "chunk {} has a non-finite embedding component",
                chunk.id
            )));
        }
        match dims {
            Some(d) if d != vector.len() => {
                return Err(RagError::Validation(format!(
                    "embedding dimension mismatch for chunk {}: expected {}, got {}",
                    chunk.id,
                    d,
                    vector.len()
                )));
            }
            Some(_) => {}
            None => dims = Some(vector.len()),
        }
    }
    Ok(if entries.is_empty() { None } else { dims })
}

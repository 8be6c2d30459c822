//! Core data models that flow through the ingestion and chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-length embedding vector. All vectors in one store share a dimension.
pub type EmbeddingVector = Vec<f32>;

/// An uploaded document. Immutable once stored; a re-upload of the same
/// `source_uri` produces a new document that supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_uri: String,
    pub raw_text: String,
    pub upload_timestamp: DateTime<Utc>,
}

/// A window of a document's text prepared for embedding.
///
/// `char_start` and `char_end` are character offsets into the owning
/// document's `raw_text` (end exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
}

/// One scored candidate from a vector store query. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub sequence_index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub score: f32,
    pub text: String,
    pub source_uri: String,
}

/// A completed user/assistant exchange within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: String,
    pub assistant_message: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(user_message: impl Into<String>, assistant_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lightweight listing entry for a stored document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub source_uri: String,
    pub upload_timestamp: DateTime<Utc>,
    pub chunk_count: usize,
}

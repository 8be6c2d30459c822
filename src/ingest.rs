//! Ingestion pipeline: extract → chunk → embed → commit.
//!
//! Every chunk/vector pair of a document is buffered and written with a
//! single [`VectorStore::commit_document`] call, so an ingestion that fails
//! or is cancelled part-way writes nothing. Ingests and deletes touching one
//! `source_uri` are serialized through
//! [`DocumentLocks`](crate::locks::DocumentLocks).

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use ragchat_core::chunk::chunk_text;
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::models::{Document, DocumentSummary};
use ragchat_core::store::ChunkEntry;

use crate::assistant::Assistant;
use crate::extract::extract_text;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub source_uri: String,
    pub chunk_count: usize,
    /// Ids of earlier documents with the same `source_uri` that were replaced.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<String>,
}

impl Assistant {
    /// Index already-extracted text under `source_uri`.
    pub async fn ingest_text(&self, source_uri: &str, text: &str) -> RagResult<IngestReport> {
        let source_uri = source_uri.trim();
        if source_uri.is_empty() {
            return Err(RagError::Validation("source uri must not be empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(RagError::Validation(format!("{} has no text", source_uri)));
        }

        let _guard = self.locks.lock(source_uri).await;

        let doc = Document {
            id: Uuid::new_v4().to_string(),
            source_uri: source_uri.to_string(),
            raw_text: text.to_string(),
            upload_timestamp: Utc::now(),
        };
        let chunking = &self.config.chunking;
        let chunks = chunk_text(&doc.id, &doc.raw_text, chunking.chunk_size, chunking.overlap)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let entries: Vec<ChunkEntry> = chunks.into_iter().zip(vectors).collect();

        let superseded = self.store.commit_document(&doc, &entries).await?;
        tracing::info!(
            document = %doc.id,
            source = %doc.source_uri,
            chunks = entries.len(),
            superseded = superseded.len(),
            "ingested document"
        );

        Ok(IngestReport {
            document_id: doc.id,
            source_uri: doc.source_uri,
            chunk_count: entries.len(),
            superseded,
        })
    }

    /// Extract and index an uploaded file, bounded by the request timeout.
    pub async fn ingest_upload(&self, file_name: &str, bytes: &[u8]) -> RagResult<IngestReport> {
        let text = extract_text(file_name, bytes)?;
        let limit = self.config.server.request_timeout();
        tokio::time::timeout(limit, self.ingest_text(file_name, &text))
            .await
            .map_err(|_| RagError::EmbeddingService {
                attempts: 0,
                detail: format!("ingestion timed out after {} ms", limit.as_millis()),
            })?
    }

    /// Read a local file and index it under its path.
    pub async fn ingest_file(&self, path: &Path) -> RagResult<IngestReport> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::Validation(format!("cannot read {}: {}", path.display(), e)))?;
        let text = extract_text(&path.to_string_lossy(), &bytes)?;
        self.ingest_text(&path.to_string_lossy(), &text).await
    }

    /// Remove a document and all of its chunks. Returns the number of chunks
    /// removed.
    ///
    /// Takes the same `source_uri` lock as ingestion, so a delete waits for
    /// an in-flight re-ingest of that source to commit first.
    pub async fn delete_document(&self, document_id: &str) -> RagResult<usize> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {}", document_id)))?;
        let _guard = self.locks.lock(&doc.source_uri).await;
        let removed = self.store.delete(document_id).await?;
        tracing::info!(document = %document_id, chunks = removed, "deleted document");
        Ok(removed)
    }

    pub async fn list_documents(&self) -> RagResult<Vec<DocumentSummary>> {
        self.store.list_documents().await
    }
}

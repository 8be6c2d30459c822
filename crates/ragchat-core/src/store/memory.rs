//! In-memory [`VectorStore`] implementation for tests and embedded use.
//!
//! All state sits behind a single `std::sync::RwLock`, so every write
//! (upsert, commit, delete) is atomic with respect to queries. Vector
//! search is brute-force cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, RagResult};
use crate::models::{Chunk, Document, DocumentSummary, EmbeddingVector, RetrievalResult};

use super::{check_entries, rank_candidates, ChunkEntry, MetadataFilter, RankedCandidate, VectorStore};

struct StoredChunk {
    chunk: Chunk,
    vector: EmbeddingVector,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, StoredChunk>,
    next_seq: u64,
    dims: Option<usize>,
}

impl Inner {
    fn put_chunks(&mut self, entries: &[ChunkEntry]) {
        for (chunk, vector) in entries {
            let mut chunk = chunk.clone();
            chunk.embedding = None;
            match self.chunks.get_mut(&chunk.id) {
                Some(existing) => {
                    existing.chunk = chunk;
                    existing.vector = vector.clone();
                }
                None => {
                    let seq = self.next_seq;
                    self.next_seq += 1;
                    self.chunks.insert(
                        chunk.id.clone(),
                        StoredChunk {
                            chunk,
                            vector: vector.clone(),
                            seq,
                        },
                    );
                }
            }
        }
    }

    fn remove_document(&mut self, document_id: &str) -> usize {
        self.docs.remove(document_id);
        let before = self.chunks.len();
        self.chunks.retain(|_, sc| sc.chunk.document_id != document_id);
        if self.chunks.is_empty() {
            self.dims = None;
        }
        before - self.chunks.len()
    }
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RagResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RagError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> RagResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RagError::StoreUnavailable("in-memory store lock poisoned".to_string()))
    }

    /// Number of stored chunks (all documents).
    pub fn chunk_count(&self) -> RagResult<usize> {
        Ok(self.read()?.chunks.len())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn upsert(&self, entries: &[ChunkEntry]) -> RagResult<()> {
        let mut inner = self.write()?;
        let dims = check_entries(entries, inner.dims)?;
        for (chunk, _) in entries {
            if !inner.docs.contains_key(&chunk.document_id) {
                return Err(RagError::Validation(format!(
                    "chunk {} references unknown document {}",
                    chunk.id, chunk.document_id
                )));
            }
        }
        if dims.is_some() {
            inner.dims = dims;
        }
        inner.put_chunks(entries);
        Ok(())
    }

    async fn commit_document(
        &self,
        doc: &Document,
        entries: &[ChunkEntry],
    ) -> RagResult<Vec<String>> {
        let mut inner = self.write()?;
        let dims = check_entries(entries, inner.dims)?;
        if let Some((chunk, _)) = entries.iter().find(|(c, _)| c.document_id != doc.id) {
            return Err(RagError::Validation(format!(
                "chunk {} does not belong to document {}",
                chunk.id, doc.id
            )));
        }

        let superseded: Vec<String> = inner
            .docs
            .values()
            .filter(|d| d.source_uri == doc.source_uri && d.id != doc.id)
            .map(|d| d.id.clone())
            .collect();
        for id in &superseded {
            inner.remove_document(id);
        }
        // Re-committing the same id replaces its chunk set wholesale.
        inner.remove_document(&doc.id);

        inner.docs.insert(doc.id.clone(), doc.clone());
        if dims.is_some() {
            inner.dims = dims;
        }
        inner.put_chunks(entries);
        Ok(superseded)
    }

    async fn query(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RagResult<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        if let Some(d) = inner.dims {
            if d != query_vector.len() {
                return Err(RagError::Validation(format!(
                    "query vector has dimension {}, store holds {}",
                    query_vector.len(),
                    d
                )));
            }
        }

        let candidates: Vec<RankedCandidate> = inner
            .chunks
            .values()
            .filter_map(|sc| {
                let doc = inner.docs.get(&sc.chunk.document_id)?;
                if let Some(f) = filter {
                    if !f.matches(&doc.id, &doc.source_uri, doc.upload_timestamp.timestamp()) {
                        return None;
                    }
                }
                Some(RankedCandidate {
                    seq: sc.seq,
                    result: RetrievalResult {
                        chunk_id: sc.chunk.id.clone(),
                        document_id: sc.chunk.document_id.clone(),
                        sequence_index: sc.chunk.sequence_index,
                        char_start: sc.chunk.char_start,
                        char_end: sc.chunk.char_end,
                        score: cosine_similarity(query_vector, &sc.vector),
                        text: sc.chunk.text.clone(),
                        source_uri: doc.source_uri.clone(),
                    },
                })
            })
            .collect();

        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete(&self, document_id: &str) -> RagResult<usize> {
        let mut inner = self.write()?;
        if !inner.docs.contains_key(document_id) {
            return Err(RagError::NotFound(format!("document {}", document_id)));
        }
        Ok(inner.remove_document(document_id))
    }

    async fn get_document(&self, document_id: &str) -> RagResult<Option<Document>> {
        Ok(self.read()?.docs.get(document_id).cloned())
    }

    async fn list_documents(&self) -> RagResult<Vec<DocumentSummary>> {
        let inner = self.read()?;
        let mut docs: Vec<DocumentSummary> = inner
            .docs
            .values()
            .map(|d| DocumentSummary {
                id: d.id.clone(),
                source_uri: d.source_uri.clone(),
                upload_timestamp: d.upload_timestamp,
                chunk_count: inner
                    .chunks
                    .values()
                    .filter(|sc| sc.chunk.document_id == d.id)
                    .count(),
            })
            .collect();
        docs.sort_by(|a, b| {
            b.upload_timestamp
                .cmp(&a.upload_timestamp)
                .then(a.id.cmp(&b.id))
        });
        Ok(docs)
    }

    async fn health(&self) -> RagResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use chrono::Utc;
    use std::sync::Arc;

    fn doc(id: &str, uri: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_uri: uri.to_string(),
            raw_text: text.to_string(),
            upload_timestamp: Utc::now(),
        }
    }

    fn entries(doc: &Document, dims: usize, seed: f32) -> Vec<ChunkEntry> {
        chunk_text(&doc.id, &doc.raw_text, 10, 2)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let mut v = vec![0.0; dims];
                v[i % dims] = 1.0;
                v[0] += seed;
                (c, v)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_id() {
        let store = InMemoryStore::new();
        let d = doc("d1", "a.md", "The cat sat. The dog ran.");
        store.commit_document(&d, &[]).await.unwrap();

        let mut chunk = chunk_text("d1", &d.raw_text, 100, 0).unwrap().remove(0);
        store.upsert(&[(chunk.clone(), vec![1.0, 0.0])]).await.unwrap();
        chunk.text = "replaced".to_string();
        store.upsert(&[(chunk.clone(), vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.chunk_count().unwrap(), 1);
        let hits = store.query(&[0.0, 1.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "replaced");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_upsert_unknown_document_rejected() {
        let store = InMemoryStore::new();
        let chunk = chunk_text("ghost", "hello", 10, 0).unwrap().remove(0);
        let err = store.upsert(&[(chunk, vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryStore::new();
        let d = doc("d1", "a.md", "The cat sat. The dog ran.");
        store.commit_document(&d, &entries(&d, 4, 0.0)).await.unwrap();

        let d2 = doc("d2", "b.md", "Another text");
        let err = store
            .commit_document(&d2, &entries(&d2, 3, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        // Nothing from the rejected batch was written.
        assert!(store.get_document("d2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_sorted_and_tie_broken_by_insertion() {
        let store = InMemoryStore::new();
        let d = doc("d1", "a.md", "first second third");
        let chunks = chunk_text("d1", &d.raw_text, 6, 0).unwrap();
        let pairs: Vec<ChunkEntry> = chunks
            .into_iter()
            .map(|c| {
                let v = if c.sequence_index == 0 {
                    vec![0.0, 1.0]
                } else {
                    vec![1.0, 0.0]
                };
                (c, v)
            })
            .collect();
        store.commit_document(&d, &pairs).await.unwrap();

        let hits = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        let indices: Vec<usize> = hits.iter().map(|h| h.sequence_index).collect();
        assert_eq!(indices, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_delete_removes_all_chunks() {
        let store = InMemoryStore::new();
        let d1 = doc("d1", "a.md", "The cat sat. The dog ran.");
        let d2 = doc("d2", "b.md", "Birds fly south in winter.");
        store.commit_document(&d1, &entries(&d1, 4, 0.0)).await.unwrap();
        store.commit_document(&d2, &entries(&d2, 4, 0.5)).await.unwrap();

        let removed = store.delete("d1").await.unwrap();
        assert_eq!(removed, 3);
        let hits = store.query(&[1.0, 0.0, 0.0, 0.0], 100, None).await.unwrap();
        assert!(hits.iter().all(|h| h.document_id == "d2"));
        assert!(matches!(
            store.delete("d1").await,
            Err(RagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_supersedes_same_source() {
        let store = InMemoryStore::new();
        let old = doc("old", "notes.md", "old text here");
        let new = doc("new", "notes.md", "new text here");
        store.commit_document(&old, &entries(&old, 4, 0.0)).await.unwrap();
        let superseded = store.commit_document(&new, &entries(&new, 4, 0.0)).await.unwrap();

        assert_eq!(superseded, vec!["old".to_string()]);
        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "new");
    }

    #[tokio::test]
    async fn test_filter_by_source() {
        let store = InMemoryStore::new();
        let d1 = doc("d1", "a.md", "The cat sat.");
        let d2 = doc("d2", "b.md", "The dog ran.");
        store.commit_document(&d1, &entries(&d1, 4, 0.0)).await.unwrap();
        store.commit_document(&d2, &entries(&d2, 4, 0.0)).await.unwrap();

        let filter = MetadataFilter {
            source_uri: Some("b.md".to_string()),
            ..Default::default()
        };
        let hits = store
            .query(&[1.0, 0.0, 0.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.source_uri == "b.md"));
    }

    #[tokio::test]
    async fn test_top_k_zero() {
        let store = InMemoryStore::new();
        let d = doc("d1", "a.md", "The cat sat.");
        store.commit_document(&d, &entries(&d, 4, 0.0)).await.unwrap();
        assert!(store.query(&[1.0, 0.0, 0.0, 0.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_last_commit_wins() {
        let store = Arc::new(InMemoryStore::new());
        let d = doc("d1", "a.md", &"abcdefghij".repeat(10));
        store.commit_document(&d, &[]).await.unwrap();

        let base = chunk_text("d1", &d.raw_text, 10, 0).unwrap();
        let version = |tag: &str| -> Vec<ChunkEntry> {
            base.iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.text = format!("{}-{}", tag, c.sequence_index);
                    (c, vec![1.0, 0.0])
                })
                .collect()
        };
        let (a, b) = (version("A"), version("B"));

        let s1 = Arc::clone(&store);
        let s2 = Arc::clone(&store);
        let h1 = tokio::spawn(async move { s1.upsert(&a).await });
        let h2 = tokio::spawn(async move { s2.upsert(&b).await });
        h1.await.unwrap().unwrap();
        h2.await.unwrap().unwrap();

        let hits = store.query(&[1.0, 0.0], 100, None).await.unwrap();
        assert_eq!(hits.len(), base.len());
        let first_tag = &hits[0].text[..1];
        assert!(hits.iter().all(|h| h.text.starts_with(first_tag)));
    }

    #[tokio::test]
    async fn test_dimension_resets_once_store_is_empty() {
        let store = InMemoryStore::new();
        let d1 = doc("d1", "a.md", "The cat sat. The dog ran.");
        store.commit_document(&d1, &entries(&d1, 4, 0.0)).await.unwrap();
        store.delete("d1").await.unwrap();

        let d2 = doc("d2", "b.md", "Another text");
        store.commit_document(&d2, &entries(&d2, 3, 0.0)).await.unwrap();
        let hits = store.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(matches!(
            store.query(&[1.0, 0.0, 0.0, 0.0], 10, None).await,
            Err(RagError::Validation(_))
        ));
    }
}

//! SQLite-backed [`VectorStore`] implementation.
//!
//! Documents and chunks live in two tables; each chunk row carries its
//! embedding as a little-endian f32 BLOB. Vector search is brute-force
//! cosine similarity over every stored vector, ties broken by the row's
//! `seq` (insertion order).
//!
//! Every mutating method runs in a single transaction, so a failed or
//! cancelled write leaves the store unchanged.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use ragchat_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragchat_core::error::{RagError, RagResult};
use ragchat_core::models::{Document, DocumentSummary, RetrievalResult};
use ragchat_core::store::{
    check_entries, rank_candidates, ChunkEntry, MetadataFilter, RankedCandidate, VectorStore,
};

use crate::config::DbConfig;
use crate::{db, migrate};

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn unavailable(e: sqlx::Error) -> RagError {
    RagError::StoreUnavailable(e.to_string())
}

fn ts_from_ms(ms: i64) -> RagResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| RagError::StoreUnavailable(format!("corrupt upload timestamp: {}", ms)))
}

fn row_to_document(row: &SqliteRow) -> RagResult<Document> {
    Ok(Document {
        id: row.get("id"),
        source_uri: row.get("source_uri"),
        raw_text: row.get("raw_text"),
        upload_timestamp: ts_from_ms(row.get("uploaded_at_ms"))?,
    })
}

/// Dimension of the vectors already stored, if any.
async fn stored_dims(tx: &mut Transaction<'_, Sqlite>) -> RagResult<Option<usize>> {
    let len: Option<i64> = sqlx::query_scalar("SELECT length(embedding) FROM chunks LIMIT 1")
        .fetch_optional(&mut **tx)
        .await
        .map_err(unavailable)?;
    Ok(len.map(|bytes| bytes as usize / 4))
}

async fn write_chunks(tx: &mut Transaction<'_, Sqlite>, entries: &[ChunkEntry]) -> RagResult<()> {
    for (chunk, vector) in entries {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, sequence_index, text, char_start, char_end, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                sequence_index = excluded.sequence_index,
                text = excluded.text,
                char_start = excluded.char_start,
                char_end = excluded.char_end,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.sequence_index as i64)
        .bind(&chunk.text)
        .bind(chunk.char_start as i64)
        .bind(chunk.char_end as i64)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut **tx)
        .await
        .map_err(unavailable)?;
    }
    Ok(())
}

async fn remove_document(tx: &mut Transaction<'_, Sqlite>, document_id: &str) -> RagResult<usize> {
    let removed = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await
        .map_err(unavailable)?
        .rows_affected();
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await
        .map_err(unavailable)?;
    Ok(removed as usize)
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, entries: &[ChunkEntry]) -> RagResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let dims = stored_dims(&mut tx).await?;
        check_entries(entries, dims)?;

        for (chunk, _) in entries {
            let known: bool =
                sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
                    .bind(&chunk.document_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(unavailable)?;
            if !known {
                return Err(RagError::Validation(format!(
                    "chunk {} references unknown document {}",
                    chunk.id, chunk.document_id
                )));
            }
        }

        write_chunks(&mut tx, entries).await?;
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn commit_document(
        &self,
        doc: &Document,
        entries: &[ChunkEntry],
    ) -> RagResult<Vec<String>> {
        if let Some((chunk, _)) = entries.iter().find(|(c, _)| c.document_id != doc.id) {
            return Err(RagError::Validation(format!(
                "chunk {} does not belong to document {}",
                chunk.id, doc.id
            )));
        }

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        // Re-committing the same id replaces its chunk set wholesale. Doing
        // this write first takes the database write lock up front.
        remove_document(&mut tx, &doc.id).await?;

        let dims = stored_dims(&mut tx).await?;
        check_entries(entries, dims)?;

        let superseded: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE source_uri = ? AND id != ?")
                .bind(&doc.source_uri)
                .bind(&doc.id)
                .fetch_all(&mut *tx)
                .await
                .map_err(unavailable)?;
        for id in &superseded {
            remove_document(&mut tx, id).await?;
        }

        sqlx::query(
            "INSERT INTO documents (id, source_uri, raw_text, uploaded_at_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.source_uri)
        .bind(&doc.raw_text)
        .bind(doc.upload_timestamp.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        write_chunks(&mut tx, entries).await?;
        tx.commit().await.map_err(unavailable)?;
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

        let rows = sqlx::query(
            r#"
            SELECT c.seq, c.id, c.document_id, c.sequence_index, c.text,
                   c.char_start, c.char_end, c.embedding,
                   d.source_uri, d.uploaded_at_ms
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            if vector.len() != query_vector.len() {
                return Err(RagError::Validation(format!(
                    "query vector has dimension {}, store holds {}",
                    query_vector.len(),
                    vector.len()
                )));
            }

            let document_id: String = row.get("document_id");
            let source_uri: String = row.get("source_uri");
            if let Some(f) = filter {
                let uploaded_at = ts_from_ms(row.get("uploaded_at_ms"))?.timestamp();
                if !f.matches(&document_id, &source_uri, uploaded_at) {
                    continue;
                }
            }

            let seq: i64 = row.get("seq");
            let sequence_index: i64 = row.get("sequence_index");
            let char_start: i64 = row.get("char_start");
            let char_end: i64 = row.get("char_end");
            candidates.push(RankedCandidate {
                seq: seq as u64,
                result: RetrievalResult {
                    chunk_id: row.get("id"),
                    document_id,
                    sequence_index: sequence_index as usize,
                    char_start: char_start as usize,
                    char_end: char_end as usize,
                    score: cosine_similarity(query_vector, &vector),
                    text: row.get("text"),
                    source_uri,
                },
            });
        }

        Ok(rank_candidates(candidates, top_k))
    }

    async fn delete(&self, document_id: &str) -> RagResult<usize> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let known: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unavailable)?;
        if !known {
            return Err(RagError::NotFound(format!("document {}", document_id)));
        }
        let removed = remove_document(&mut tx, document_id).await?;
        tx.commit().await.map_err(unavailable)?;
        Ok(removed)
    }

    async fn get_document(&self, document_id: &str) -> RagResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_uri, raw_text, uploaded_at_ms FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self) -> RagResult<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.source_uri, d.uploaded_at_ms, COUNT(c.id) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.id
            ORDER BY d.uploaded_at_ms DESC, d.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                let chunk_count: i64 = row.get("chunk_count");
                Ok(DocumentSummary {
                    id: row.get("id"),
                    source_uri: row.get("source_uri"),
                    upload_timestamp: ts_from_ms(row.get("uploaded_at_ms"))?,
                    chunk_count: chunk_count as usize,
                })
            })
            .collect()
    }

    async fn health(&self) -> RagResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragchat_core::chunk::chunk_text;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let config = DbConfig {
            path: dir.path().join("data/test.sqlite"),
            ..Default::default()
        };
        let store = SqliteStore::open(&config).await.unwrap();
        (dir, store)
    }

    fn doc(id: &str, uri: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_uri: uri.to_string(),
            raw_text: text.to_string(),
            upload_timestamp: Utc::now(),
        }
    }

    fn entries(doc: &Document, dir: [f32; 2]) -> Vec<ChunkEntry> {
        chunk_text(&doc.id, &doc.raw_text, 10, 2)
            .unwrap()
            .into_iter()
            .map(|c| (c, dir.to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_query_delete() {
        let (_dir, store) = open_temp().await;
        let d = doc("d1", "pets.md", "The cat sat. The dog ran.");
        store.commit_document(&d, &entries(&d, [1.0, 0.0])).await.unwrap();

        let results = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(results.len(), 3);
        // Equal scores come back in insertion order.
        let order: Vec<usize> = results.iter().map(|r| r.sequence_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(results[0].source_uri, "pets.md");

        assert_eq!(store.delete("d1").await.unwrap(), 3);
        assert!(store.query(&[1.0, 0.0], 10, None).await.unwrap().is_empty());
        assert!(matches!(store.delete("d1").await, Err(RagError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_keeps_position() {
        let (_dir, store) = open_temp().await;
        let d = doc("d1", "a.md", "The cat sat. The dog ran.");
        let mut es = entries(&d, [1.0, 0.0]);
        store.commit_document(&d, &es).await.unwrap();

        es[0].0.text = "replaced".to_string();
        store.upsert(&es[..1]).await.unwrap();
        store.upsert(&es[..1]).await.unwrap();

        let results = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk_id, "d1:0");
        assert_eq!(results[0].text, "replaced");
    }

    #[tokio::test]
    async fn test_upsert_unknown_document_rejected() {
        let (_dir, store) = open_temp().await;
        let d = doc("ghost", "g.md", "nothing here at all");
        let err = store.upsert(&entries(&d, [1.0, 0.0])).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_leaves_store_unchanged() {
        let (_dir, store) = open_temp().await;
        let a = doc("a", "a.md", "first document text");
        store.commit_document(&a, &entries(&a, [1.0, 0.0])).await.unwrap();

        let b = doc("b", "b.md", "second document text");
        let bad: Vec<ChunkEntry> = entries(&b, [1.0, 0.0])
            .into_iter()
            .map(|(c, _)| (c, vec![1.0, 0.0, 0.0]))
            .collect();
        assert!(matches!(
            store.commit_document(&b, &bad).await,
            Err(RagError::Validation(_))
        ));
        assert!(store.get_document("b").await.unwrap().is_none());
        assert_eq!(store.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reupload_supersedes_same_source() {
        let (_dir, store) = open_temp().await;
        let old = doc("old", "notes.md", "old notes content");
        store.commit_document(&old, &entries(&old, [1.0, 0.0])).await.unwrap();
        let new = doc("new", "notes.md", "new notes content");
        let superseded = store
            .commit_document(&new, &entries(&new, [0.0, 1.0]))
            .await
            .unwrap();
        assert_eq!(superseded, vec!["old".to_string()]);

        let docs = store.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "new");
        assert!(docs[0].chunk_count > 0);
        assert!(store
            .query(&[1.0, 0.0], 10, None)
            .await
            .unwrap()
            .iter()
            .all(|r| r.document_id == "new"));
    }

    #[tokio::test]
    async fn test_filter_by_source() {
        let (_dir, store) = open_temp().await;
        let a = doc("a", "a.md", "alpha alpha alpha");
        let b = doc("b", "b.md", "beta beta beta");
        store.commit_document(&a, &entries(&a, [1.0, 0.0])).await.unwrap();
        store.commit_document(&b, &entries(&b, [1.0, 0.0])).await.unwrap();

        let filter = MetadataFilter {
            source_uri: Some("b.md".into()),
            ..Default::default()
        };
        let results = store.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.document_id == "b"));
    }

    #[tokio::test]
    async fn test_get_document_roundtrip() {
        let (_dir, store) = open_temp().await;
        let d = doc("d", "d.md", "some text");
        store.commit_document(&d, &entries(&d, [1.0, 0.0])).await.unwrap();
        let got = store.get_document("d").await.unwrap().unwrap();
        assert_eq!(got.raw_text, "some text");
        assert_eq!(
            got.upload_timestamp.timestamp_millis(),
            d.upload_timestamp.timestamp_millis()
        );
        store.health().await.unwrap();
    }
}

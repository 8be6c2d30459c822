use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::DbConfig;
use crate::db;

/// Create the database file (if needed) and apply the schema.
pub async fn run_migrations(config: &DbConfig) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema creation.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_uri TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            uploaded_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `seq` is the insertion order used to break score ties. Upserts keep
    // the row (and so the seq) of an existing chunk id.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            document_id TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            char_start INTEGER NOT NULL,
            char_end INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_uri ON documents(source_uri)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at_ms DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

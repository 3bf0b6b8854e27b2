//! Schema creation. Idempotent; `sift init` may run any number of times.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_type TEXT NOT NULL,
            source_id TEXT UNIQUE,
            source_uri TEXT,
            title TEXT,
            created_at INTEGER NOT NULL,
            added_at INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            embedding_type TEXT NOT NULL,
            content TEXT,
            vector BLOB NOT NULL,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT,
            added_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index, embedding_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='embeddings_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE embeddings_fts USING fts5(
                embedding_id UNINDEXED,
                document_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_type ON documents(source_type)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_document_id ON embeddings(document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_model ON embeddings(embedding_model)")
        .execute(pool)
        .await?;

    Ok(())
}

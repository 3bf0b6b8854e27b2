//! SQLite-backed implementation of the store traits.
//!
//! Documents and embeddings live in two tables (schema in `migrate`),
//! with an FTS5 index over embedding content for the keyword branch.
//! Vector search decodes the BLOB column and scores in-process with the
//! model's registered metric, scoped to rows of that model; an ANN
//! structure could replace the scan behind the same trait method.
//!
//! Metadata filters are pushed down into SQL so both search branches
//! rank over the same pre-filtered candidate set.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use docsift_core::error::{SiftError, SiftResult};
use docsift_core::metadata::DocumentMetadata;
use docsift_core::models::{Document, EmbeddingRecord, EmbeddingType, SourceType};
use docsift_core::query::{KeywordSearchRequest, MetadataFilter, VectorSearchRequest};
use docsift_core::store::{
    ConflictPolicy, DocumentStore, DocumentSummary, EmbeddingInfo, EmbeddingStore, SearchCandidate,
};
use docsift_core::vector::{blob_to_vec, vec_to_blob, ModelRegistry};

/// SQLite store; implements both [`DocumentStore`] and [`EmbeddingStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    registry: ModelRegistry,
}

/// Row counts reported by `sift stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub documents: i64,
    pub embeddings: i64,
    pub embeddings_per_model: Vec<(String, i64)>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, registry: ModelRegistry) -> Self {
        Self { pool, registry }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(
            "SELECT embedding_model, COUNT(*) AS n FROM embeddings GROUP BY embedding_model ORDER BY embedding_model",
        )
        .fetch_all(&self.pool)
        .await?;
        let embeddings_per_model = rows
            .iter()
            .map(|r| (r.get::<String, _>("embedding_model"), r.get::<i64, _>("n")))
            .collect();
        Ok(StoreStats {
            documents,
            embeddings,
            embeddings_per_model,
        })
    }
}

/// Bind value for dynamically assembled filter SQL.
enum SqlParam {
    Text(String),
    Int(i64),
    Real(f64),
}

/// Append `AND ...` fragments (against alias `d` for documents, `e` for
/// embeddings) and their bind values for each filter.
fn push_filters(
    filters: &[MetadataFilter],
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) -> SiftResult<()> {
    for filter in filters {
        match filter {
            MetadataFilter::SourceType(st) => {
                sql.push_str(" AND d.source_type = ?");
                params.push(SqlParam::Text(st.as_str().to_string()));
            }
            MetadataFilter::CreatedAfter(bound) => {
                sql.push_str(" AND d.created_at >= ?");
                params.push(SqlParam::Int(bound.timestamp()));
            }
            MetadataFilter::CreatedBefore(bound) => {
                sql.push_str(" AND d.created_at <= ?");
                params.push(SqlParam::Int(bound.timestamp()));
            }
            MetadataFilter::FieldEquals { key, value } => {
                sql.push_str(" AND json_extract(d.metadata_json, ?) = ?");
                params.push(SqlParam::Text(field_path(key)));
                // Serialize through serde_json so the comparison sees the
                // exact text stored in metadata_json.
                let json = serde_json::to_value(value)
                    .map_err(|e| SiftError::Storage(anyhow!("filter value: {e}")))?;
                params.push(match json {
                    serde_json::Value::Number(n) => {
                        SqlParam::Real(n.as_f64().unwrap_or(f64::NAN))
                    }
                    serde_json::Value::String(s) => SqlParam::Text(s),
                    other => SqlParam::Text(other.to_string()),
                });
            }
            MetadataFilter::FieldAtLeast { key, value } => {
                sql.push_str(" AND CAST(json_extract(d.metadata_json, ?) AS REAL) >= ?");
                params.push(SqlParam::Text(field_path(key)));
                params.push(SqlParam::Real(*value));
            }
            MetadataFilter::FieldAtMost { key, value } => {
                sql.push_str(" AND CAST(json_extract(d.metadata_json, ?) AS REAL) <= ?");
                params.push(SqlParam::Text(field_path(key)));
                params.push(SqlParam::Real(*value));
            }
        }
    }
    Ok(())
}

/// JSON path to a first-class metadata field. The path is a bound
/// parameter; stripping quotes keeps the key from escaping the path
/// expression itself.
fn field_path(key: &str) -> String {
    format!("$.fields.\"{}\"", key.replace('"', ""))
}

fn push_type_filter(
    types: &Option<Vec<EmbeddingType>>,
    sql: &mut String,
    params: &mut Vec<SqlParam>,
) {
    if let Some(list) = types {
        if list.is_empty() {
            return;
        }
        sql.push_str(" AND e.embedding_type IN (");
        for (i, et) in list.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            params.push(SqlParam::Text(et.as_str().to_string()));
        }
        sql.push(')');
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for p in params {
        query = match p {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(r) => query.bind(*r),
        };
    }
    query
}

/// Quote keyword terms so user input is matched literally instead of
/// being parsed as FTS5 query syntax. Terms are ANDed.
fn fts_match_expr(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn timestamp_to_datetime(ts: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(ts, 0).unwrap_or(chrono::DateTime::UNIX_EPOCH)
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> SiftResult<Document> {
    let source_type: String = row.get("source_type");
    let metadata_json: String = row.get("metadata_json");
    let metadata: DocumentMetadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Document {
        id: row.get("id"),
        source_type: source_type.parse::<SourceType>()?,
        source_id: row.get("source_id"),
        source_uri: row.get("source_uri"),
        title: row.get("title"),
        created_at: timestamp_to_datetime(row.get("created_at")),
        added_at: timestamp_to_datetime(row.get("added_at")),
        metadata,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn add(&self, doc: &Document, policy: ConflictPolicy) -> SiftResult<String> {
        let metadata_json = serde_json::to_string(&doc.metadata).context("serialize metadata")?;

        // Conflict detection rides on the UNIQUE(source_id) constraint so
        // two concurrent ingests of the same source never both insert.
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, source_type, source_id, source_uri, title,
                                   created_at, added_at, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO NOTHING
            "#,
        )
        .bind(&doc.id)
        .bind(doc.source_type.as_str())
        .bind(&doc.source_id)
        .bind(&doc.source_uri)
        .bind(&doc.title)
        .bind(doc.created_at.timestamp())
        .bind(doc.added_at.timestamp())
        .bind(&metadata_json)
        .execute(&self.pool)
        .await
        .context("insert document")?;

        if result.rows_affected() > 0 {
            return Ok(doc.id.clone());
        }

        let source_id = doc
            .source_id
            .clone()
            .ok_or_else(|| SiftError::Storage(anyhow!("insert ignored without source_id")))?;
        let existing_id: String =
            sqlx::query_scalar("SELECT id FROM documents WHERE source_id = ?")
                .bind(&source_id)
                .fetch_one(&self.pool)
                .await
                .context("fetch conflicting document")?;

        match policy {
            ConflictPolicy::Reject => Err(SiftError::Conflict {
                source_id,
                existing_id,
            }),
            ConflictPolicy::Update => {
                sqlx::query(
                    r#"
                    UPDATE documents
                    SET source_uri = ?, title = ?, created_at = ?, metadata_json = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&doc.source_uri)
                .bind(&doc.title)
                .bind(doc.created_at.timestamp())
                .bind(&metadata_json)
                .bind(&existing_id)
                .execute(&self.pool)
                .await
                .context("update document")?;
                Ok(existing_id)
            }
        }
    }

    async fn get(&self, id: &str) -> SiftResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_type, source_id, source_uri, title, created_at, added_at, metadata_json FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch document")?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_by_source_id(&self, source_id: &str) -> SiftResult<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, source_type, source_id, source_uri, title, created_at, added_at, metadata_json FROM documents WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch document by source_id")?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn delete(&self, id: &str) -> SiftResult<bool> {
        // The schema declares ON DELETE CASCADE, but the rows are removed
        // explicitly so correctness never depends on foreign_keys being
        // enabled on a given connection.
        let mut tx = self.pool.begin().await.context("begin delete")?;

        sqlx::query("DELETE FROM embeddings_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete fts rows")?;
        sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete embeddings")?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("delete document")?;

        tx.commit().await.context("commit delete")?;
        Ok(result.rows_affected() > 0)
    }

    async fn summary(&self, id: &str) -> SiftResult<Option<DocumentSummary>> {
        let row = sqlx::query(
            "SELECT id, title, source_type, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetch document summary")?;

        match row {
            None => Ok(None),
            Some(row) => {
                let source_type: String = row.get("source_type");
                Ok(Some(DocumentSummary {
                    id: row.get("id"),
                    title: row.get("title"),
                    source_type: source_type.parse::<SourceType>()?,
                    created_at: timestamp_to_datetime(row.get("created_at")),
                }))
            }
        }
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    async fn upsert(&self, record: &EmbeddingRecord) -> SiftResult<()> {
        self.registry
            .check_vector(&record.embedding_model, &record.vector)?;
        let blob = vec_to_blob(&record.vector);

        let mut tx = self.pool.begin().await.context("begin upsert")?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (id, document_id, chunk_index, embedding_type, content,
                                    vector, embedding_model, dims, content_hash, added_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, chunk_index, embedding_type) DO UPDATE SET
                content = excluded.content,
                vector = excluded.vector,
                embedding_model = excluded.embedding_model,
                dims = excluded.dims,
                content_hash = excluded.content_hash,
                added_at = excluded.added_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.document_id)
        .bind(record.chunk_index)
        .bind(record.embedding_type.as_str())
        .bind(&record.content)
        .bind(&blob)
        .bind(&record.embedding_model)
        .bind(record.vector.len() as i64)
        .bind(&record.content_hash)
        .bind(record.added_at.timestamp())
        .execute(&mut *tx)
        .await
        .context("upsert embedding")?;

        // On conflict the existing row keeps its id; look it up before
        // refreshing the FTS side.
        let stored_id: String = sqlx::query_scalar(
            "SELECT id FROM embeddings WHERE document_id = ? AND chunk_index = ? AND embedding_type = ?",
        )
        .bind(&record.document_id)
        .bind(record.chunk_index)
        .bind(record.embedding_type.as_str())
        .fetch_one(&mut *tx)
        .await
        .context("fetch stored embedding id")?;

        sqlx::query("DELETE FROM embeddings_fts WHERE embedding_id = ?")
            .bind(&stored_id)
            .execute(&mut *tx)
            .await
            .context("clear fts row")?;

        if let Some(content) = &record.content {
            sqlx::query(
                "INSERT INTO embeddings_fts (embedding_id, document_id, content) VALUES (?, ?, ?)",
            )
            .bind(&stored_id)
            .bind(&record.document_id)
            .bind(content)
            .execute(&mut *tx)
            .await
            .context("insert fts row")?;
        }

        tx.commit().await.context("commit upsert")?;
        Ok(())
    }

    async fn content_hashes(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> SiftResult<HashMap<(i64, EmbeddingType), Option<String>>> {
        let rows = sqlx::query(
            "SELECT chunk_index, embedding_type, content_hash FROM embeddings WHERE document_id = ? AND embedding_model = ?",
        )
        .bind(document_id)
        .bind(embedding_model)
        .fetch_all(&self.pool)
        .await
        .context("fetch content hashes")?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let et: String = row.get("embedding_type");
            map.insert(
                (row.get::<i64, _>("chunk_index"), et.parse::<EmbeddingType>()?),
                row.get::<Option<String>, _>("content_hash"),
            );
        }
        Ok(map)
    }

    async fn remove_chunks_above(&self, document_id: &str, max_index: i64) -> SiftResult<u64> {
        let mut tx = self.pool.begin().await.context("begin chunk cleanup")?;

        sqlx::query(
            r#"
            DELETE FROM embeddings_fts WHERE embedding_id IN (
                SELECT id FROM embeddings
                WHERE document_id = ? AND embedding_type = 'content_chunk' AND chunk_index > ?
            )
            "#,
        )
        .bind(document_id)
        .bind(max_index)
        .execute(&mut *tx)
        .await
        .context("delete stale fts rows")?;

        let result = sqlx::query(
            "DELETE FROM embeddings WHERE document_id = ? AND embedding_type = 'content_chunk' AND chunk_index > ?",
        )
        .bind(document_id)
        .bind(max_index)
        .execute(&mut *tx)
        .await
        .context("delete stale chunks")?;

        tx.commit().await.context("commit chunk cleanup")?;
        Ok(result.rows_affected())
    }

    async fn count_for_document(&self, document_id: &str) -> SiftResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .context("count embeddings")?;
        Ok(count as u64)
    }

    async fn list_for_document(&self, document_id: &str) -> SiftResult<Vec<EmbeddingInfo>> {
        let rows = sqlx::query(
            "SELECT chunk_index, embedding_type, embedding_model, content_hash FROM embeddings WHERE document_id = ? ORDER BY chunk_index, embedding_type",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .context("list embeddings")?;

        let mut infos = Vec::with_capacity(rows.len());
        for row in &rows {
            let et: String = row.get("embedding_type");
            infos.push(EmbeddingInfo {
                chunk_index: row.get("chunk_index"),
                embedding_type: et.parse::<EmbeddingType>()?,
                embedding_model: row.get("embedding_model"),
                content_hash: row.get("content_hash"),
            });
        }
        Ok(infos)
    }

    async fn vector_search(
        &self,
        req: &VectorSearchRequest,
        query_vector: &[f32],
    ) -> SiftResult<Vec<SearchCandidate>> {
        let spec = self
            .registry
            .check_vector(&req.embedding_model, query_vector)?;

        let mut sql = String::from(
            r#"
            SELECT e.id, e.document_id, e.chunk_index, e.embedding_type, e.content, e.vector
            FROM embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE e.embedding_model = ? AND e.dims = ?
            "#,
        );
        let mut params = vec![
            SqlParam::Text(req.embedding_model.clone()),
            SqlParam::Int(spec.dims as i64),
        ];
        push_type_filter(&req.target_embedding_types, &mut sql, &mut params);
        push_filters(&req.filters, &mut sql, &mut params)?;

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .context("vector search scan")?;

        let mut candidates: Vec<SearchCandidate> = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            let et: String = row.get("embedding_type");
            candidates.push(SearchCandidate {
                embedding_id: row.get("id"),
                document_id: row.get("document_id"),
                embedding_type: et.parse::<EmbeddingType>()?,
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                raw_score: spec.metric.similarity(query_vector, &vector) as f64,
            });
        }

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(req.candidate_window);
        Ok(candidates)
    }

    async fn keyword_search(
        &self,
        req: &KeywordSearchRequest,
    ) -> SiftResult<Vec<SearchCandidate>> {
        let match_expr = fts_match_expr(&req.query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            r#"
            SELECT embeddings_fts.embedding_id AS embedding_id,
                   embeddings_fts.rank AS fts_rank,
                   e.document_id, e.chunk_index, e.embedding_type, e.content
            FROM embeddings_fts
            JOIN embeddings e ON e.id = embeddings_fts.embedding_id
            JOIN documents d ON d.id = e.document_id
            WHERE embeddings_fts MATCH ?
            "#,
        );
        let mut params = vec![SqlParam::Text(match_expr)];
        push_type_filter(&req.target_embedding_types, &mut sql, &mut params);
        push_filters(&req.filters, &mut sql, &mut params)?;
        sql.push_str(" ORDER BY embeddings_fts.rank LIMIT ?");
        params.push(SqlParam::Int(req.candidate_window as i64));

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .context("keyword search")?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.get("fts_rank");
            let et: String = row.get("embedding_type");
            candidates.push(SearchCandidate {
                embedding_id: row.get("embedding_id"),
                document_id: row.get("document_id"),
                embedding_type: et.parse::<EmbeddingType>()?,
                chunk_index: row.get("chunk_index"),
                content: row.get("content"),
                // FTS5 rank is ascending-better; negate so higher wins.
                raw_score: -rank,
            });
        }
        Ok(candidates)
    }
}

//! Storage abstraction for docsift.
//!
//! Two traits, matching the two logical relations: [`DocumentStore`] for
//! document rows and [`EmbeddingStore`] for embedding rows and the two
//! search branches. A backend (SQLite, in-memory) implements both.
//!
//! Uniqueness invariants are enforced here, at the store level, with
//! insert-with-conflict-detection rather than application locks, so
//! concurrent ingestion of distinct source items never contends.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SiftResult;
use crate::models::{Document, EmbeddingRecord, EmbeddingType, SourceType};
use crate::query::{KeywordSearchRequest, VectorSearchRequest};

/// How [`DocumentStore::add`] treats an existing row with the same
/// `source_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Fail with [`SiftError::Conflict`](crate::error::SiftError::Conflict).
    #[default]
    Reject,
    /// Update the existing document's mutable fields in place and return
    /// the existing id.
    Update,
}

/// A candidate embedding row returned from one search branch.
///
/// Lists are ordered best-first; the 1-based position in the list is the
/// rank used for fusion.
#[derive(Debug, Clone)]
pub struct SearchCandidate {
    pub embedding_id: String,
    pub document_id: String,
    pub embedding_type: EmbeddingType,
    pub chunk_index: i64,
    pub content: Option<String>,
    /// Branch-native score (similarity, or negated BM25 rank); only the
    /// ordering matters to the ranker.
    pub raw_score: f64,
}

/// Lightweight document fields for search result enrichment.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
}

/// Inventory row describing one stored embedding, vector omitted.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingInfo {
    pub chunk_index: i64,
    pub embedding_type: EmbeddingType,
    pub embedding_model: String,
    pub content_hash: Option<String>,
}

/// Persistence for document rows.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, or resolve a `source_id` collision per `policy`.
    ///
    /// Returns the id the document is stored under (the existing row's id
    /// when `policy` is [`ConflictPolicy::Update`] and the source_id was
    /// already present).
    async fn add(&self, doc: &Document, policy: ConflictPolicy) -> SiftResult<String>;

    async fn get(&self, id: &str) -> SiftResult<Option<Document>>;

    async fn find_by_source_id(&self, source_id: &str) -> SiftResult<Option<Document>>;

    /// Delete a document and, by cascade, all its embeddings.
    ///
    /// Returns false when no such document exists.
    async fn delete(&self, id: &str) -> SiftResult<bool>;

    /// Lightweight fields for one document, for result enrichment.
    async fn summary(&self, id: &str) -> SiftResult<Option<DocumentSummary>>;
}

/// Persistence and search over embedding rows.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert or replace the embedding at `(document_id, chunk_index,
    /// embedding_type)`.
    async fn upsert(&self, record: &EmbeddingRecord) -> SiftResult<()>;

    /// Stored content hashes for one document under one model, keyed by
    /// `(chunk_index, embedding_type)`. Drives idempotent re-ingestion.
    async fn content_hashes(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> SiftResult<HashMap<(i64, EmbeddingType), Option<String>>>;

    /// Remove content chunks with index greater than `max_index`
    /// (re-ingested content shrank). Returns the number removed.
    async fn remove_chunks_above(&self, document_id: &str, max_index: i64) -> SiftResult<u64>;

    async fn count_for_document(&self, document_id: &str) -> SiftResult<u64>;

    async fn list_for_document(&self, document_id: &str) -> SiftResult<Vec<EmbeddingInfo>>;

    /// Nearest embeddings to `query_vector` under the request's model and
    /// filters, best-first, at most `candidate_window` rows.
    async fn vector_search(
        &self,
        req: &VectorSearchRequest,
        query_vector: &[f32],
    ) -> SiftResult<Vec<SearchCandidate>>;

    /// Best full-text matches over embedding content under the request's
    /// filters, best-first, at most `candidate_window` rows.
    async fn keyword_search(&self, req: &KeywordSearchRequest)
        -> SiftResult<Vec<SearchCandidate>>;
}

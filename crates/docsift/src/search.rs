//! Hybrid search execution.
//!
//! Plans the query, runs the vector and keyword branches against the
//! store, fuses by Reciprocal Rank Fusion, enriches hits with document
//! fields, applies the deterministic tie-break, and truncates. Pure and
//! stateless over the current store contents.
//!
//! The query embedding is produced here, through the embedder
//! collaborator. When the embedder is unavailable and the query also has
//! a keyword branch, the vector branch is dropped with a warning instead
//! of failing the whole search.

use std::time::Duration;

use tracing::warn;

use docsift_core::error::{SiftError, SiftResult};
use docsift_core::query::{plan, ResultItem, SearchQuery};
use docsift_core::rank::{dedup_by_document, fuse, FusedHit};
use docsift_core::store::{DocumentStore, DocumentSummary, EmbeddingStore, SearchCandidate};

use crate::collaborators::{call_with_timeout, Embedder};
use crate::config::RetrievalConfig;

pub async fn search<S>(
    store: &S,
    embedder: &dyn Embedder,
    query: &SearchQuery,
    retrieval: &RetrievalConfig,
    call_timeout: Duration,
) -> SiftResult<Vec<ResultItem>>
where
    S: DocumentStore + EmbeddingStore,
{
    if query.top_k < 1 {
        return Err(SiftError::Validation("top_k must be >= 1".to_string()));
    }

    let plan = plan(query, retrieval.candidate_window);

    let vector_hits: Vec<SearchCandidate> = match &plan.vector {
        Some(req) => {
            let embedded = call_with_timeout(
                "embedder",
                call_timeout,
                embedder.embed(&req.text, &req.embedding_model),
            )
            .await;
            match embedded {
                Ok(query_vector) => store.vector_search(req, &query_vector).await?,
                Err(err) if plan.keyword.is_some() => {
                    warn!(error = %err, "query embedding failed, keyword branch only");
                    Vec::new()
                }
                Err(err) => return Err(err),
            }
        }
        None => Vec::new(),
    };

    let keyword_hits: Vec<SearchCandidate> = match &plan.keyword {
        Some(req) => store.keyword_search(req).await?,
        None => Vec::new(),
    };

    if vector_hits.is_empty() && keyword_hits.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = fuse(&vector_hits, &keyword_hits, retrieval.rrf_k);
    if plan.deduplicate_by_document {
        hits = dedup_by_document(hits);
    }

    // Enrich from the document store; a hit whose document vanished
    // under a concurrent delete is silently dropped.
    let mut enriched: Vec<(FusedHit, DocumentSummary)> = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(summary) = store.summary(&hit.document_id).await? {
            enriched.push((hit, summary));
        }
    }

    // Equal scores break by recency, then by id for determinism.
    enriched.sort_by(|(a, da), (b, db)| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| db.created_at.cmp(&da.created_at))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    enriched.truncate(plan.top_k);

    Ok(enriched
        .into_iter()
        .map(|(hit, summary)| ResultItem {
            document_id: hit.document_id,
            title: summary.title,
            source_type: summary.source_type,
            created_at: summary.created_at,
            embedding_type: hit.embedding_type,
            matched_content: hit.content,
            rrf_score: hit.rrf_score,
        })
        .collect())
}

//! Reciprocal Rank Fusion over the vector and keyword candidate lists.
//!
//! RRF merges two ordered result lists without normalizing their raw
//! scores against each other: each list contributes `1/(k + rank)` per
//! item, ranks are 1-based, and items appearing in both lists sum both
//! contributions. The smoothing constant `k` damps the advantage of the
//! very top ranks; it is configuration, not a constant (the source
//! material's `k=60` is an unvalidated default).
//!
//! This module is pure: candidates in, fused hits out. Document-level
//! enrichment and the final recency tie-break happen in the search
//! executor, which knows the documents.

use std::collections::{HashMap, HashSet};

use crate::models::EmbeddingType;
use crate::store::SearchCandidate;

/// A candidate embedding after fusion, carrying both branch ranks.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub embedding_id: String,
    pub document_id: String,
    pub embedding_type: EmbeddingType,
    pub chunk_index: i64,
    pub content: Option<String>,
    /// 1-based rank in the vector branch, when present.
    pub vec_rank: Option<usize>,
    /// 1-based rank in the keyword branch, when present.
    pub fts_rank: Option<usize>,
    pub rrf_score: f64,
}

/// Fuse the two candidate lists by Reciprocal Rank Fusion.
///
/// Both inputs must be ordered best-first; rank is the 1-based position.
/// The output is sorted by `rrf_score` descending, with `embedding_id`
/// as a stable secondary key (the executor applies the document-level
/// tie-break after enrichment).
pub fn fuse(
    vector_hits: &[SearchCandidate],
    keyword_hits: &[SearchCandidate],
    k: f64,
) -> Vec<FusedHit> {
    let mut merged: HashMap<&str, FusedHit> = HashMap::new();

    for (pos, cand) in vector_hits.iter().enumerate() {
        let rank = pos + 1;
        merged
            .entry(cand.embedding_id.as_str())
            .or_insert_with(|| hit_from(cand))
            .vec_rank = Some(rank);
    }
    for (pos, cand) in keyword_hits.iter().enumerate() {
        let rank = pos + 1;
        merged
            .entry(cand.embedding_id.as_str())
            .or_insert_with(|| hit_from(cand))
            .fts_rank = Some(rank);
    }

    let mut hits: Vec<FusedHit> = merged
        .into_values()
        .map(|mut hit| {
            let vec_part = hit.vec_rank.map_or(0.0, |r| 1.0 / (k + r as f64));
            let fts_part = hit.fts_rank.map_or(0.0, |r| 1.0 / (k + r as f64));
            hit.rrf_score = vec_part + fts_part;
            hit
        })
        .collect();

    hits.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.embedding_id.cmp(&b.embedding_id))
    });
    hits
}

/// Keep only the best hit per document, preserving order.
///
/// Expects `hits` already sorted best-first.
pub fn dedup_by_document(hits: Vec<FusedHit>) -> Vec<FusedHit> {
    let mut seen: HashSet<String> = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.document_id.clone()))
        .collect()
}

fn hit_from(cand: &SearchCandidate) -> FusedHit {
    FusedHit {
        embedding_id: cand.embedding_id.clone(),
        document_id: cand.document_id.clone(),
        embedding_type: cand.embedding_type,
        chunk_index: cand.chunk_index,
        content: cand.content.clone(),
        vec_rank: None,
        fts_rank: None,
        rrf_score: 0.0,
    }
}

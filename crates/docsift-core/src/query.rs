//! Structured queries, metadata filters, and the query planner.
//!
//! The planner translates one [`SearchQuery`] into two independent
//! search requests: a vector request (semantic text to be embedded under
//! the query's model) and a keyword request (full-text match over
//! embedding content). Both carry the same conjunctive filter list, so
//! both branches rank over the same candidate set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::MetadataValue;
use crate::models::{Document, EmbeddingType, SourceType};

/// One conjunctive predicate over document fields or metadata entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFilter {
    SourceType(SourceType),
    /// `created_at >= bound` (inclusive).
    CreatedAfter(DateTime<Utc>),
    /// `created_at <= bound` (inclusive).
    CreatedBefore(DateTime<Utc>),
    /// Equality on a first-class metadata field.
    FieldEquals { key: String, value: MetadataValue },
    /// Numeric `field >= value`.
    FieldAtLeast { key: String, value: f64 },
    /// Numeric `field <= value`.
    FieldAtMost { key: String, value: f64 },
}

impl MetadataFilter {
    /// Evaluate this predicate against a document.
    ///
    /// The SQLite store pushes filters into SQL; this in-process form
    /// backs the in-memory store and property checks in tests.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            MetadataFilter::SourceType(st) => doc.source_type == *st,
            MetadataFilter::CreatedAfter(bound) => doc.created_at >= *bound,
            MetadataFilter::CreatedBefore(bound) => doc.created_at <= *bound,
            MetadataFilter::FieldEquals { key, value } => doc.metadata.get(key) == Some(value),
            MetadataFilter::FieldAtLeast { key, value } => match doc.metadata.get(key) {
                Some(MetadataValue::Number(n)) => n >= value,
                _ => false,
            },
            MetadataFilter::FieldAtMost { key, value } => match doc.metadata.get(key) {
                Some(MetadataValue::Number(n)) => n <= value,
                _ => false,
            },
        }
    }
}

/// True when the document satisfies every filter (conjunction).
pub fn document_matches(doc: &Document, filters: &[MetadataFilter]) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

/// A structured query as accepted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Natural-language text for the vector branch; empty/None disables it.
    #[serde(default)]
    pub semantic_text: Option<String>,
    /// Keyword terms for the full-text branch; empty disables it.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub filters: Vec<MetadataFilter>,
    /// Model the query vector is produced under; always explicit.
    pub embedding_model: String,
    /// Restrict matching to these aspects; None means all.
    #[serde(default)]
    pub target_embedding_types: Option<Vec<EmbeddingType>>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Collapse results to the best embedding per document.
    #[serde(default = "default_dedup")]
    pub deduplicate_by_document: bool,
}

fn default_top_k() -> usize {
    10
}

fn default_dedup() -> bool {
    true
}

/// Vector branch of a planned query.
#[derive(Debug, Clone)]
pub struct VectorSearchRequest {
    /// Text to embed under `embedding_model`; the executor owns the
    /// embedding call.
    pub text: String,
    pub embedding_model: String,
    pub filters: Vec<MetadataFilter>,
    pub target_embedding_types: Option<Vec<EmbeddingType>>,
    /// How many nearest candidates to fetch before fusion.
    pub candidate_window: usize,
}

/// Keyword branch of a planned query.
#[derive(Debug, Clone)]
pub struct KeywordSearchRequest {
    /// Whitespace-joined terms; store implementations decide quoting.
    pub query: String,
    pub filters: Vec<MetadataFilter>,
    pub target_embedding_types: Option<Vec<EmbeddingType>>,
    pub candidate_window: usize,
}

/// Output of the planner: zero, one, or two branch requests.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub vector: Option<VectorSearchRequest>,
    pub keyword: Option<KeywordSearchRequest>,
    pub top_k: usize,
    pub deduplicate_by_document: bool,
}

/// Translate a query into its branch requests.
///
/// A branch with no input text is omitted rather than executed empty;
/// a query with neither branch plans to an empty result.
pub fn plan(query: &SearchQuery, candidate_window: usize) -> QueryPlan {
    let semantic = query
        .semantic_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let keywords: Vec<&str> = query
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();

    let vector = semantic.map(|text| VectorSearchRequest {
        text: text.to_string(),
        embedding_model: query.embedding_model.clone(),
        filters: query.filters.clone(),
        target_embedding_types: query.target_embedding_types.clone(),
        candidate_window,
    });

    let keyword = if keywords.is_empty() {
        None
    } else {
        Some(KeywordSearchRequest {
            query: keywords.join(" "),
            filters: query.filters.clone(),
            target_embedding_types: query.target_embedding_types.clone(),
            candidate_window,
        })
    };

    QueryPlan {
        vector,
        keyword,
        top_k: query.top_k,
        deduplicate_by_document: query.deduplicate_by_document,
    }
}

/// One entry of a ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultItem {
    pub document_id: String,
    pub title: Option<String>,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    pub embedding_type: EmbeddingType,
    /// The matched embedding's source text, when it has one.
    pub matched_content: Option<String>,
    pub rrf_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DocumentMetadata;

    fn doc(source_type: SourceType, created_at: &str) -> Document {
        Document {
            id: "d1".into(),
            source_type,
            source_id: Some("s1".into()),
            source_uri: None,
            title: None,
            created_at: created_at.parse().unwrap(),
            added_at: created_at.parse().unwrap(),
            metadata: DocumentMetadata::default(),
        }
    }

    fn query(semantic: Option<&str>, keywords: &[&str]) -> SearchQuery {
        SearchQuery {
            semantic_text: semantic.map(str::to_string),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            filters: Vec::new(),
            embedding_model: "m".into(),
            target_embedding_types: None,
            top_k: 10,
            deduplicate_by_document: true,
        }
    }

    #[test]
    fn test_plan_both_branches() {
        let plan = plan(&query(Some("pharmacy receipt"), &["receipt"]), 50);
        assert!(plan.vector.is_some());
        let kw = plan.keyword.unwrap();
        assert_eq!(kw.query, "receipt");
        assert_eq!(kw.candidate_window, 50);
    }

    #[test]
    fn test_plan_skips_empty_branches() {
        let p = plan(&query(None, &[]), 50);
        assert!(p.vector.is_none());
        assert!(p.keyword.is_none());

        let p = plan(&query(Some("   "), &["", "  "]), 50);
        assert!(p.vector.is_none());
        assert!(p.keyword.is_none());
    }

    #[test]
    fn test_source_type_filter() {
        let d = doc(SourceType::Email, "2024-10-05T12:00:00Z");
        assert!(MetadataFilter::SourceType(SourceType::Email).matches(&d));
        assert!(!MetadataFilter::SourceType(SourceType::Pdf).matches(&d));
    }

    #[test]
    fn test_date_range_filters_inclusive() {
        let d = doc(SourceType::Email, "2024-10-05T12:00:00Z");
        let after = MetadataFilter::CreatedAfter("2024-10-01T00:00:00Z".parse().unwrap());
        let before = MetadataFilter::CreatedBefore("2024-10-31T23:59:59Z".parse().unwrap());
        assert!(document_matches(&d, &[after.clone(), before.clone()]));

        let d_nov = doc(SourceType::Email, "2024-11-02T00:00:00Z");
        assert!(!document_matches(&d_nov, &[after, before]));
    }

    #[test]
    fn test_field_filters() {
        let mut d = doc(SourceType::Email, "2024-10-05T12:00:00Z");
        d.metadata.insert("amount", MetadataValue::Number(42.1));
        d.metadata
            .insert("sender", MetadataValue::Text("pharmacy@example.com".into()));

        assert!(MetadataFilter::FieldEquals {
            key: "sender".into(),
            value: MetadataValue::Text("pharmacy@example.com".into()),
        }
        .matches(&d));
        assert!(MetadataFilter::FieldAtLeast {
            key: "amount".into(),
            value: 40.0,
        }
        .matches(&d));
        assert!(!MetadataFilter::FieldAtMost {
            key: "amount".into(),
            value: 40.0,
        }
        .matches(&d));
        // Missing or non-numeric fields never satisfy range predicates.
        assert!(!MetadataFilter::FieldAtLeast {
            key: "missing".into(),
            value: 0.0,
        }
        .matches(&d));
    }
}

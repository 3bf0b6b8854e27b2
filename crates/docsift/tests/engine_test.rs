//! End-to-end tests for the engine: ingestion, idempotent re-ingestion,
//! hybrid search with filters, RRF ordering, and cascade deletion —
//! against a scratch SQLite database with scripted collaborators.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::Row;
use tempfile::TempDir;

use docsift::collaborators::{
    Collaborators, DisabledSummarizer, Embedder, MetadataEnricher, PlainTextExtractor,
};
use docsift::config::{ChunkingConfig, Config, DbConfig, ModelConfig, PipelineConfig, RetrievalConfig};
use docsift::engine::Engine;
use docsift::pipeline::IngestOptions;
use docsift::sqlite_store::SqliteStore;
use docsift::{db, migrate};

use docsift_core::error::SiftError;
use docsift_core::metadata::{DocumentMetadata, MetadataSchema, MetadataValue};
use docsift_core::models::{EmbeddingType, IngestStage, SourceItem, SourceType};
use docsift_core::query::{MetadataFilter, SearchQuery};
use docsift_core::store::{ConflictPolicy, EmbeddingStore};
use docsift_core::vector::DistanceMetric;

const MODEL: &str = "stub-embed-8";
const DIMS: usize = 8;

// ---- scripted collaborators ----

/// Deterministic bag-of-words embedder: shared words produce similar
/// vectors, disjoint texts are orthogonal.
struct StubEmbedder;

fn stub_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text.to_lowercase().split_whitespace() {
        let mut h: usize = 17;
        for b in word.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as usize);
        }
        v[h % DIMS] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed(&self, text: &str, _embedding_model: &str) -> Result<Vec<f32>> {
        Ok(stub_vector(text))
    }
}

/// Fails only for one exact text, so sibling aspects still embed.
struct FailForTextEmbedder(&'static str);

#[async_trait]
impl Embedder for FailForTextEmbedder {
    async fn embed(&self, text: &str, _embedding_model: &str) -> Result<Vec<f32>> {
        if text == self.0 {
            bail!("embedding backend rejected this text");
        }
        Ok(stub_vector(text))
    }
}

/// Returns a fixed structured map.
struct ScriptedEnricher(serde_json::Value);

#[async_trait]
impl MetadataEnricher for ScriptedEnricher {
    async fn enrich(&self, _text: &str, _schema: &MetadataSchema) -> Result<serde_json::Value> {
        Ok(self.0.clone())
    }
}

/// Sleeps past the pipeline's call timeout.
struct SlowEnricher;

#[async_trait]
impl MetadataEnricher for SlowEnricher {
    async fn enrich(&self, _text: &str, _schema: &MetadataSchema) -> Result<serde_json::Value> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(json!({}))
    }
}

fn collaborators(embedder: Arc<dyn Embedder>, enricher: Arc<dyn MetadataEnricher>) -> Collaborators {
    Collaborators {
        extractor: Arc::new(PlainTextExtractor),
        enricher,
        embedder,
        summarizer: Arc::new(DisabledSummarizer),
    }
}

fn default_collaborators() -> Collaborators {
    collaborators(
        Arc::new(StubEmbedder),
        Arc::new(ScriptedEnricher(json!({
            "sender": "pharmacy@example.com",
            "amount": 42.10,
        }))),
    )
}

// ---- environment ----

fn test_config(db_path: &Path) -> Config {
    Config {
        db: DbConfig {
            path: db_path.to_path_buf(),
        },
        chunking: ChunkingConfig { max_chars: 2000 },
        retrieval: RetrievalConfig {
            rrf_k: 60.0,
            candidate_window: 50,
            top_k: 10,
        },
        pipeline: PipelineConfig {
            max_concurrency: 2,
            call_timeout_secs: 1,
            default_model: Some(MODEL.to_string()),
            generate_summaries: false,
        },
        models: vec![ModelConfig {
            name: MODEL.to_string(),
            dims: DIMS,
            metric: DistanceMetric::Cosine,
        }],
        metadata_schema: None,
    }
}

async fn setup(collab: Collaborators) -> (TempDir, Engine<SqliteStore>, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("sift.sqlite");
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let config = test_config(&db_path);
    let store = Arc::new(SqliteStore::new(pool, config.registry().unwrap()));
    let engine = Engine::new(Arc::clone(&store), collab, &config);
    (tmp, engine, store)
}

fn opts() -> IngestOptions {
    IngestOptions::new(MODEL)
}

fn item(
    source_type: SourceType,
    source_id: &str,
    title: Option<&str>,
    created_at: &str,
    text: &str,
) -> SourceItem {
    SourceItem {
        source_type,
        source_id: Some(source_id.to_string()),
        source_uri: None,
        title: title.map(str::to_string),
        created_at: created_at.parse().unwrap(),
        text: Some(text.to_string()),
        raw: None,
        mime_type: None,
        ocr_text: None,
        metadata: DocumentMetadata::default(),
    }
}

fn receipt_item() -> SourceItem {
    item(
        SourceType::Email,
        "email-123",
        Some("Pharmacy Receipt"),
        "2024-10-05T00:00:00Z",
        "Receipt total $42.10",
    )
}

fn october_filters() -> Vec<MetadataFilter> {
    vec![
        MetadataFilter::SourceType(SourceType::Email),
        MetadataFilter::CreatedAfter("2024-10-01T00:00:00Z".parse().unwrap()),
        MetadataFilter::CreatedBefore("2024-10-31T23:59:59Z".parse().unwrap()),
    ]
}

fn query(semantic: Option<&str>, keywords: &[&str]) -> SearchQuery {
    SearchQuery {
        semantic_text: semantic.map(str::to_string),
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        filters: Vec::new(),
        embedding_model: MODEL.to_string(),
        target_embedding_types: None,
        top_k: 10,
        deduplicate_by_document: true,
    }
}

// ---- scenarios ----

#[tokio::test]
async fn test_hybrid_search_finds_receipt_under_filters() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;

    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    // Title aspect plus one content chunk.
    assert_eq!(report.stored_aspects.len(), 2);

    // A distractor outside the filter window.
    engine
        .ingest(
            &item(
                SourceType::Note,
                "note-1",
                Some("Meeting notes"),
                "2024-03-01T00:00:00Z",
                "Kubernetes cluster maintenance plan",
            ),
            &opts(),
        )
        .await
        .unwrap();

    let mut q = query(Some("pharmacy receipt October"), &["receipt"]);
    q.filters = october_filters();
    let results = engine.search(&q).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].document_id, report.document_id);
    assert!(results[0].rrf_score > 0.0);
    for r in &results {
        assert_eq!(r.source_type, SourceType::Email);
        assert!(r.created_at >= "2024-10-01T00:00:00Z".parse().unwrap());
        assert!(r.created_at <= "2024-10-31T23:59:59Z".parse().unwrap());
    }
}

#[tokio::test]
async fn test_reingest_unchanged_is_noop() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    let first = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    let rows_before = store.count_for_document(&first.document_id).await.unwrap();
    assert!(rows_before > 0);

    let second = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    assert_eq!(second.document_id, first.document_id);
    assert!(second.stored_aspects.is_empty());
    assert!(!second.unchanged_aspects.is_empty());
    assert!(second.is_noop());

    let rows_after = store.count_for_document(&first.document_id).await.unwrap();
    assert_eq!(rows_before, rows_after);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
}

#[tokio::test]
async fn test_reingest_changed_content_regenerates_changed_aspects_only() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    // Two paragraphs too large to share a chunk.
    let long_text = format!("{}\n\n{}", "alpha ".repeat(300), "beta ".repeat(300));
    let first = engine
        .ingest(
            &item(
                SourceType::Pdf,
                "pdf-9",
                Some("Quarterly Report"),
                "2024-06-01T00:00:00Z",
                &long_text,
            ),
            &opts(),
        )
        .await
        .unwrap();
    let infos = store.list_for_document(&first.document_id).await.unwrap();
    let chunk_count = infos
        .iter()
        .filter(|i| i.embedding_type == EmbeddingType::ContentChunk)
        .count();
    assert_eq!(chunk_count, 2);

    // Shrink to one (different) chunk; title unchanged.
    let second = engine
        .ingest(
            &item(
                SourceType::Pdf,
                "pdf-9",
                Some("Quarterly Report"),
                "2024-06-01T00:00:00Z",
                "A short revision.",
            ),
            &opts(),
        )
        .await
        .unwrap();
    assert_eq!(second.document_id, first.document_id);
    assert!(second
        .unchanged_aspects
        .iter()
        .any(|a| a.embedding_type == EmbeddingType::Title));
    assert!(second
        .stored_aspects
        .iter()
        .any(|a| a.embedding_type == EmbeddingType::ContentChunk && a.chunk_index == 1));

    // The stale second chunk is gone.
    let infos = store.list_for_document(&first.document_id).await.unwrap();
    assert!(infos
        .iter()
        .all(|i| i.embedding_type != EmbeddingType::ContentChunk || i.chunk_index == 1));

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
}

#[tokio::test]
async fn test_rrf_prefers_presence_in_both_branches() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;

    let only_vector = engine
        .ingest(
            &item(
                SourceType::Note,
                "n-1",
                None,
                "2024-01-01T00:00:00Z",
                "solar panel installation",
            ),
            &opts(),
        )
        .await
        .unwrap();
    let both_branches = engine
        .ingest(
            &item(
                SourceType::Note,
                "n-2",
                None,
                "2024-01-02T00:00:00Z",
                "wind turbine maintenance",
            ),
            &opts(),
        )
        .await
        .unwrap();

    // Semantic text matches n-2 strongly; the keyword only occurs in n-2.
    let results = engine
        .search(&query(Some("wind turbine"), &["turbine"]))
        .await
        .unwrap();

    let top = &results[0];
    assert_eq!(top.document_id, both_branches.document_id);
    // Vector rank 1 + keyword rank 1.
    assert!((top.rrf_score - 2.0 / 61.0).abs() < 1e-9);

    let second = results
        .iter()
        .find(|r| r.document_id == only_vector.document_id)
        .unwrap();
    // Vector rank 2 only.
    assert!((second.rrf_score - 1.0 / 62.0).abs() < 1e-9);
    assert!(top.rrf_score > second.rrf_score);
}

#[tokio::test]
async fn test_delete_cascades_and_not_found() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    let results = engine.search(&query(None, &["receipt"])).await.unwrap();
    assert!(!results.is_empty());

    engine.delete(&report.document_id).await.unwrap();

    assert_eq!(store.count_for_document(&report.document_id).await.unwrap(), 0);
    let results = engine.search(&query(None, &["receipt"])).await.unwrap();
    assert!(results.iter().all(|r| r.document_id != report.document_id));

    assert!(matches!(
        engine.get_document(&report.document_id).await,
        Err(SiftError::NotFound(_))
    ));
    assert!(matches!(
        engine.delete(&report.document_id).await,
        Err(SiftError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_enrichment_timeout_falls_back_to_base_metadata() {
    let collab = collaborators(Arc::new(StubEmbedder), Arc::new(SlowEnricher));
    let (_tmp, engine, _store) = setup(collab).await;

    let mut source = receipt_item();
    source
        .metadata
        .insert("language", MetadataValue::Text("en".into()));

    let report = engine.ingest(&source, &opts()).await.unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.stage == IngestStage::MetadataEnrichment));

    let view = engine.get_document(&report.document_id).await.unwrap();
    assert_eq!(
        view.document.metadata.get("language"),
        Some(&MetadataValue::Text("en".into()))
    );
}

#[tokio::test]
async fn test_enrichment_invalid_shape_falls_back() {
    let collab = collaborators(
        Arc::new(StubEmbedder),
        Arc::new(ScriptedEnricher(json!({ "amount": "not a number" }))),
    );
    let (_tmp, engine, _store) = setup(collab).await;

    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.stage == IngestStage::MetadataEnrichment));

    let view = engine.get_document(&report.document_id).await.unwrap();
    assert!(view.document.metadata.get("amount").is_none());
}

#[tokio::test]
async fn test_enriched_metadata_is_filterable() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;
    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();

    let mut q = query(None, &["receipt"]);
    q.filters = vec![MetadataFilter::FieldAtLeast {
        key: "amount".into(),
        value: 40.0,
    }];
    let results = engine.search(&q).await.unwrap();
    assert!(results.iter().any(|r| r.document_id == report.document_id));

    q.filters = vec![MetadataFilter::FieldAtMost {
        key: "amount".into(),
        value: 40.0,
    }];
    let results = engine.search(&q).await.unwrap();
    assert!(results.is_empty());

    q.filters = vec![MetadataFilter::FieldEquals {
        key: "sender".into(),
        value: MetadataValue::Text("pharmacy@example.com".into()),
    }];
    let results = engine.search(&q).await.unwrap();
    assert!(results.iter().any(|r| r.document_id == report.document_id));
}

#[tokio::test]
async fn test_conflict_rejected_when_content_changed() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;
    engine.ingest(&receipt_item(), &opts()).await.unwrap();

    let mut changed = receipt_item();
    changed.text = Some("Receipt total $99.99".into());
    let mut reject = opts();
    reject.conflict_policy = ConflictPolicy::Reject;

    let err = engine.ingest(&changed, &reject).await.unwrap_err();
    assert!(matches!(err, SiftError::Conflict { .. }));

    // Unchanged content is idempotent even under the reject policy.
    let report = engine.ingest(&receipt_item(), &reject).await.unwrap();
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_embedding_failure_skips_only_that_aspect() {
    let collab = collaborators(
        Arc::new(FailForTextEmbedder("Pharmacy Receipt")),
        Arc::new(ScriptedEnricher(json!({}))),
    );
    let (_tmp, engine, _store) = setup(collab).await;

    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    assert!(report.warnings.iter().any(|w| {
        w.stage == IngestStage::Embedding
            && w.aspect
                .map_or(false, |a| a.embedding_type == EmbeddingType::Title)
    }));
    assert!(report
        .stored_aspects
        .iter()
        .any(|a| a.embedding_type == EmbeddingType::ContentChunk));

    // The document itself is intact.
    assert!(engine.get_document(&report.document_id).await.is_ok());
}

#[tokio::test]
async fn test_disabled_collaborators_still_persist_documents() {
    let (_tmp, engine, _store) = setup(Collaborators::disabled()).await;

    let report = engine.ingest(&receipt_item(), &opts()).await.unwrap();
    // Every embedding aspect failed, but the document stands.
    assert!(report.stored_aspects.is_empty());
    assert!(!report.warnings.is_empty());

    // No embeddings mean no keyword rows either, so nothing is findable;
    // get_document still works.
    let view = engine.get_document(&report.document_id).await.unwrap();
    assert_eq!(view.embeddings.len(), 0);
}

#[tokio::test]
async fn test_top_k_bound_holds() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;

    for i in 0..5 {
        engine
            .ingest(
                &item(
                    SourceType::Note,
                    &format!("note-{i}"),
                    None,
                    "2024-05-01T00:00:00Z",
                    &format!("gardening journal entry number {i}"),
                ),
                &opts(),
            )
            .await
            .unwrap();
    }

    let mut q = query(Some("gardening journal"), &["gardening"]);
    q.top_k = 2;
    let results = engine.search(&q).await.unwrap();
    assert!(results.len() <= 2);
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_aspect_tuple_uniqueness_invariant() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    engine.ingest(&receipt_item(), &opts()).await.unwrap();
    let mut changed = receipt_item();
    changed.text = Some("Receipt total $99.99 after refund".into());
    engine.ingest(&changed, &opts()).await.unwrap();

    let duplicates = sqlx::query(
        "SELECT document_id, chunk_index, embedding_type, COUNT(*) AS n
         FROM embeddings GROUP BY document_id, chunk_index, embedding_type HAVING n > 1",
    )
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert!(duplicates.is_empty());

    // Spot-check the inventory shape as well.
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    let rows = sqlx::query("SELECT COUNT(*) AS n FROM embeddings")
        .fetch_one(store.pool())
        .await
        .unwrap();
    let n: i64 = rows.get("n");
    assert_eq!(n, 2); // title + one content chunk
}

#[tokio::test]
async fn test_batch_ingestion_is_order_preserving() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    let items: Vec<SourceItem> = (0..3)
        .map(|i| {
            item(
                SourceType::Email,
                &format!("email-{i}"),
                Some(&format!("Message {i}")),
                "2024-07-01T00:00:00Z",
                &format!("body of message number {i}"),
            )
        })
        .collect();

    let reports = engine.ingest_batch(items, &opts()).await;
    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert!(report.is_ok());
    }

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 3);

    // Each item got its own document.
    let mut ids: Vec<String> = reports
        .into_iter()
        .map(|r| r.unwrap().document_id)
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_source_id_less_items_never_conflict() {
    let (_tmp, engine, store) = setup(default_collaborators()).await;

    let mut a = receipt_item();
    a.source_id = None;
    let mut b = receipt_item();
    b.source_id = None;

    let ra = engine.ingest(&a, &opts()).await.unwrap();
    let rb = engine.ingest(&b, &opts()).await.unwrap();
    assert_ne!(ra.document_id, rb.document_id);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.documents, 2);
}

#[tokio::test]
async fn test_target_embedding_types_narrow_search() {
    let (_tmp, engine, _store) = setup(default_collaborators()).await;
    engine.ingest(&receipt_item(), &opts()).await.unwrap();

    // The keyword occurs in the title, not in the content chunk.
    let mut q = query(None, &["pharmacy"]);
    q.target_embedding_types = Some(vec![EmbeddingType::ContentChunk]);
    let results = engine.search(&q).await.unwrap();
    assert!(results.is_empty());

    q.target_embedding_types = Some(vec![EmbeddingType::Title]);
    let results = engine.search(&q).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].embedding_type, EmbeddingType::Title);
}

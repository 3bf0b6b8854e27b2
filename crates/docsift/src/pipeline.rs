//! Ingestion pipeline orchestration.
//!
//! Runs the per-item flow: text acquisition → metadata enrichment (with
//! base-metadata fallback) → document persistence → chunking → per-aspect
//! embedding → embedding persistence. A document, once its mandatory
//! precursor steps succeed, is never invalidated by a later per-aspect
//! failure; those become warnings in the [`IngestionReport`].
//!
//! Re-ingestion of a known `source_id` compares per-aspect content
//! hashes: a fully unchanged item is a no-op, a changed one regenerates
//! only the changed aspects and drops content chunks past the new count.
//!
//! Batch ingestion fans out over a semaphore-bounded worker pool — the
//! backpressure mechanism toward the external collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use docsift_core::chunk::{chunk_text, content_hash};
use docsift_core::error::{SiftError, SiftResult};
use docsift_core::metadata::{DocumentMetadata, MetadataSchema};
use docsift_core::models::{
    AspectRef, Document, EmbeddingRecord, EmbeddingType, IngestStage, IngestWarning,
    IngestionReport, SourceItem,
};
use docsift_core::store::{ConflictPolicy, DocumentStore, EmbeddingStore};

use crate::collaborators::{call_with_timeout, Collaborators};
use crate::config::{ChunkingConfig, PipelineConfig};

/// Per-call ingestion options. The embedding model is always explicit.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub embedding_model: String,
    /// Applied when the item's `source_id` already exists and its content
    /// changed. [`ConflictPolicy::Update`] gives the standard re-ingestion
    /// lifecycle; `Reject` surfaces the collision instead.
    pub conflict_policy: ConflictPolicy,
    pub generate_summary: bool,
}

impl IngestOptions {
    pub fn new(embedding_model: impl Into<String>) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            conflict_policy: ConflictPolicy::Update,
            generate_summary: false,
        }
    }
}

/// One aspect awaiting an embedding: the text span and its hash.
struct Aspect {
    key: AspectRef,
    text: String,
    hash: String,
}

impl Aspect {
    fn new(embedding_type: EmbeddingType, chunk_index: i64, text: String) -> Self {
        let hash = content_hash(&text);
        Self {
            key: AspectRef::new(embedding_type, chunk_index),
            text,
            hash,
        }
    }
}

pub struct IngestionPipeline<S> {
    store: Arc<S>,
    collaborators: Collaborators,
    schema: MetadataSchema,
    max_chunk_chars: usize,
    call_timeout: Duration,
    max_concurrency: usize,
}

impl<S> Clone for IngestionPipeline<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            collaborators: self.collaborators.clone(),
            schema: self.schema.clone(),
            max_chunk_chars: self.max_chunk_chars,
            call_timeout: self.call_timeout,
            max_concurrency: self.max_concurrency,
        }
    }
}

impl<S> IngestionPipeline<S>
where
    S: DocumentStore + EmbeddingStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        collaborators: Collaborators,
        schema: MetadataSchema,
        chunking: &ChunkingConfig,
        pipeline: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            schema,
            max_chunk_chars: chunking.max_chars,
            call_timeout: Duration::from_secs(pipeline.call_timeout_secs),
            max_concurrency: pipeline.max_concurrency,
        }
    }

    /// Ingest one source item.
    ///
    /// Fatal errors (no text, extraction failure, store failure, or a
    /// rejected conflict) return `Err`; everything else lands in the
    /// report's warnings.
    pub async fn ingest(
        &self,
        item: &SourceItem,
        opts: &IngestOptions,
    ) -> SiftResult<IngestionReport> {
        let mut warnings: Vec<IngestWarning> = Vec::new();

        // Extracted text is mandatory. No text, nothing to index.
        let text = self.resolve_text(item).await?;

        // Enrichment, falling back to the item's base metadata.
        let metadata = self.enrich_metadata(item, &text, &mut warnings).await;

        let existing = match &item.source_id {
            Some(source_id) => self.store.find_by_source_id(source_id).await?,
            None => None,
        };
        let stored_hashes = match &existing {
            Some(doc) => {
                self.store
                    .content_hashes(&doc.id, &opts.embedding_model)
                    .await?
            }
            None => HashMap::new(),
        };

        // Deterministic aspects. Chunk indices count from 1; index 0
        // carries the document-level aspects.
        let mut aspects: Vec<Aspect> = Vec::new();
        if let Some(title) = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            aspects.push(Aspect::new(EmbeddingType::Title, 0, title.to_string()));
        }
        let chunks = chunk_text(&text, self.max_chunk_chars);
        let max_chunk_index = chunks.last().map(|c| c.index).unwrap_or(0);
        for chunk in chunks {
            aspects.push(Aspect {
                key: AspectRef::new(EmbeddingType::ContentChunk, chunk.index),
                text: chunk.text,
                hash: chunk.hash,
            });
        }
        if let Some(ocr) = item
            .ocr_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != text.as_str())
        {
            aspects.push(Aspect::new(EmbeddingType::OcrText, 0, ocr.to_string()));
        }

        // Re-ingestion: unchanged content is a no-op, before any write.
        if let Some(existing_doc) = &existing {
            let mut expected: HashSet<(i64, EmbeddingType)> = aspects
                .iter()
                .map(|a| (a.key.chunk_index, a.key.embedding_type))
                .collect();
            if opts.generate_summary {
                expected.insert((0, EmbeddingType::Summary));
            }

            let unchanged = aspects.iter().all(|a| {
                stored_hashes
                    .get(&(a.key.chunk_index, a.key.embedding_type))
                    .map_or(false, |h| h.as_deref() == Some(a.hash.as_str()))
            });
            let summary_satisfied =
                !opts.generate_summary || stored_hashes.contains_key(&(0, EmbeddingType::Summary));
            // A summary left over from a run with summaries enabled still
            // describes this (unchanged) content; it never forces a rewrite.
            let no_orphans = stored_hashes
                .keys()
                .all(|key| expected.contains(key) || key.1 == EmbeddingType::Summary);

            if unchanged && summary_satisfied && no_orphans {
                debug!(document_id = %existing_doc.id, "re-ingestion is a no-op");
                let mut unchanged_aspects: Vec<AspectRef> =
                    aspects.iter().map(|a| a.key).collect();
                if opts.generate_summary {
                    unchanged_aspects.push(AspectRef::new(EmbeddingType::Summary, 0));
                }
                return Ok(IngestionReport {
                    document_id: existing_doc.id.clone(),
                    stored_aspects: Vec::new(),
                    unchanged_aspects,
                    warnings,
                });
            }

            if opts.conflict_policy == ConflictPolicy::Reject {
                return Err(SiftError::Conflict {
                    source_id: item.source_id.clone().unwrap_or_default(),
                    existing_id: existing_doc.id.clone(),
                });
            }
        }

        // Persist the document; the mandatory precursor steps succeeded.
        let now = Utc::now();
        let doc = Document {
            id: existing
                .as_ref()
                .map(|d| d.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            source_type: item.source_type,
            source_id: item.source_id.clone(),
            source_uri: item.source_uri.clone(),
            title: item.title.clone(),
            created_at: item.created_at,
            added_at: existing.as_ref().map(|d| d.added_at).unwrap_or(now),
            metadata,
        };
        let policy = if existing.is_some() {
            ConflictPolicy::Update
        } else {
            opts.conflict_policy
        };
        let document_id = self.store.add(&doc, policy).await?;
        debug!(%document_id, source_type = %item.source_type, "document persisted");

        // The summary aspect needs a collaborator call of its own.
        if opts.generate_summary {
            match call_with_timeout(
                "summarizer",
                self.call_timeout,
                self.collaborators.summarizer.summarize(&text),
            )
            .await
            {
                Ok(summary) => {
                    let trimmed = summary.trim();
                    if !trimmed.is_empty() {
                        aspects.push(Aspect::new(EmbeddingType::Summary, 0, trimmed.to_string()));
                    }
                }
                Err(err) => {
                    warn!(%document_id, error = %err, "summarization failed");
                    warnings.push(IngestWarning {
                        stage: IngestStage::Summarization,
                        aspect: Some(AspectRef::new(EmbeddingType::Summary, 0)),
                        message: err.to_string(),
                    });
                }
            }
        }

        // Embed and persist each aspect independently.
        let mut stored_aspects: Vec<AspectRef> = Vec::new();
        let mut unchanged_aspects: Vec<AspectRef> = Vec::new();
        for aspect in &aspects {
            let key = (aspect.key.chunk_index, aspect.key.embedding_type);
            if stored_hashes
                .get(&key)
                .map_or(false, |h| h.as_deref() == Some(aspect.hash.as_str()))
            {
                unchanged_aspects.push(aspect.key);
                continue;
            }

            let vector = match call_with_timeout(
                "embedder",
                self.call_timeout,
                self.collaborators
                    .embedder
                    .embed(&aspect.text, &opts.embedding_model),
            )
            .await
            {
                Ok(vector) => vector,
                Err(err) => {
                    warn!(%document_id, aspect = %aspect.key, error = %err, "embedding failed");
                    warnings.push(IngestWarning {
                        stage: IngestStage::Embedding,
                        aspect: Some(aspect.key),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            let record = EmbeddingRecord {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.clone(),
                chunk_index: aspect.key.chunk_index,
                embedding_type: aspect.key.embedding_type,
                content: Some(aspect.text.clone()),
                vector,
                embedding_model: opts.embedding_model.clone(),
                content_hash: Some(aspect.hash.clone()),
                added_at: now,
            };
            match self.store.upsert(&record).await {
                Ok(()) => stored_aspects.push(aspect.key),
                Err(err @ SiftError::Model(_)) => {
                    warn!(%document_id, aspect = %aspect.key, error = %err, "embedding rejected");
                    warnings.push(IngestWarning {
                        stage: IngestStage::Embedding,
                        aspect: Some(aspect.key),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        // Content shrank: drop chunk rows past the new count.
        if existing.is_some() {
            let removed = self
                .store
                .remove_chunks_above(&document_id, max_chunk_index)
                .await?;
            if removed > 0 {
                debug!(%document_id, removed, "removed stale content chunks");
            }
        }

        Ok(IngestionReport {
            document_id,
            stored_aspects,
            unchanged_aspects,
            warnings,
        })
    }

    /// Ingest many items concurrently, bounded by the worker-pool limit.
    ///
    /// Returns one result per item, in input order. Items fail
    /// independently.
    pub async fn ingest_batch(
        &self,
        items: Vec<SourceItem>,
        opts: &IngestOptions,
    ) -> Vec<SiftResult<IngestionReport>> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SiftError::Storage(anyhow!("worker pool closed")))?;
                pipeline.ingest(&item, &opts).await
            }));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            reports.push(match handle.await {
                Ok(result) => result,
                Err(err) => Err(SiftError::Storage(anyhow!("ingestion task failed: {err}"))),
            });
        }
        reports
    }

    async fn resolve_text(&self, item: &SourceItem) -> SiftResult<String> {
        if let Some(text) = item.text.as_deref() {
            if !text.trim().is_empty() {
                return Ok(text.to_string());
            }
        }

        let (raw, mime_type) = match (&item.raw, &item.mime_type) {
            (Some(raw), Some(mime_type)) => (raw, mime_type),
            _ => {
                return Err(SiftError::Validation(
                    "source item has no text and no raw bytes to extract from".to_string(),
                ))
            }
        };

        let text = call_with_timeout(
            "text extraction",
            self.call_timeout,
            self.collaborators.extractor.extract(raw, mime_type),
        )
        .await?;

        if text.trim().is_empty() {
            return Err(SiftError::Validation(
                "extracted text is empty".to_string(),
            ));
        }
        Ok(text)
    }

    async fn enrich_metadata(
        &self,
        item: &SourceItem,
        text: &str,
        warnings: &mut Vec<IngestWarning>,
    ) -> DocumentMetadata {
        let base = item.metadata.clone();

        let raw = match call_with_timeout(
            "metadata enrichment",
            self.call_timeout,
            self.collaborators.enricher.enrich(text, &self.schema),
        )
        .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "metadata enrichment failed, using base metadata");
                warnings.push(IngestWarning {
                    stage: IngestStage::MetadataEnrichment,
                    aspect: None,
                    message: err.to_string(),
                });
                return base;
            }
        };

        match self.schema.validate(&raw) {
            Ok(mut enriched) => {
                enriched.fill_missing_from(&base);
                enriched
            }
            Err(err) => {
                warn!(error = %err, "enriched metadata failed validation, using base metadata");
                warnings.push(IngestWarning {
                    stage: IngestStage::MetadataEnrichment,
                    aspect: None,
                    message: err.to_string(),
                });
                base
            }
        }
    }
}

//! The engine facade.
//!
//! Bundles the stores, pipeline, and collaborators behind the four
//! operations front ends call: ingest, search, delete, get. Front ends
//! themselves (chat, web, CLI) stay thin; everything here is reusable
//! library surface.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use docsift_core::error::{SiftError, SiftResult};
use docsift_core::models::{Document, IngestionReport, SourceItem};
use docsift_core::query::{ResultItem, SearchQuery};
use docsift_core::store::{DocumentStore, EmbeddingInfo, EmbeddingStore};

use crate::collaborators::{Collaborators, Embedder};
use crate::config::{Config, RetrievalConfig};
use crate::pipeline::{IngestOptions, IngestionPipeline};

/// A document plus its embedding inventory, as returned by `get_document`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: Document,
    pub embeddings: Vec<EmbeddingInfo>,
}

pub struct Engine<S> {
    store: Arc<S>,
    pipeline: IngestionPipeline<S>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
    call_timeout: Duration,
}

impl<S> Engine<S>
where
    S: DocumentStore + EmbeddingStore + 'static,
{
    pub fn new(store: Arc<S>, collaborators: Collaborators, config: &Config) -> Self {
        let pipeline = IngestionPipeline::new(
            Arc::clone(&store),
            collaborators.clone(),
            config.metadata_schema(),
            &config.chunking,
            &config.pipeline,
        );
        Self {
            store,
            pipeline,
            embedder: collaborators.embedder,
            retrieval: config.retrieval.clone(),
            call_timeout: Duration::from_secs(config.pipeline.call_timeout_secs),
        }
    }

    pub async fn ingest(
        &self,
        item: &SourceItem,
        opts: &IngestOptions,
    ) -> SiftResult<IngestionReport> {
        self.pipeline.ingest(item, opts).await
    }

    pub async fn ingest_batch(
        &self,
        items: Vec<SourceItem>,
        opts: &IngestOptions,
    ) -> Vec<SiftResult<IngestionReport>> {
        self.pipeline.ingest_batch(items, opts).await
    }

    pub async fn search(&self, query: &SearchQuery) -> SiftResult<Vec<ResultItem>> {
        crate::search::search(
            self.store.as_ref(),
            self.embedder.as_ref(),
            query,
            &self.retrieval,
            self.call_timeout,
        )
        .await
    }

    pub async fn delete(&self, document_id: &str) -> SiftResult<()> {
        if self.store.delete(document_id).await? {
            Ok(())
        } else {
            Err(SiftError::NotFound(document_id.to_string()))
        }
    }

    pub async fn get_document(&self, document_id: &str) -> SiftResult<DocumentView> {
        let document = self
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| SiftError::NotFound(document_id.to_string()))?;
        let embeddings = self.store.list_for_document(document_id).await?;
        Ok(DocumentView {
            document,
            embeddings,
        })
    }
}

//! External collaborator contracts.
//!
//! Text extraction (OCR/parsing), metadata enrichment, embedding
//! generation, and summarization are opaque functions implemented
//! elsewhere (an LLM service, an OCR engine). This module defines their
//! contracts as async traits, the bounded-timeout wrapper every call
//! goes through, and the built-in fallback implementations the CLI and
//! tests run with.
//!
//! The `Disabled*` implementations always fail, which exercises the
//! pipeline's degradation paths: ingestion still persists the document
//! and records per-aspect warnings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use docsift_core::error::{SiftError, SiftResult};
use docsift_core::metadata::MetadataSchema;

/// Extracts plain text from raw bytes (OCR/parsing).
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, raw: &[u8], mime_type: &str) -> Result<String>;
}

/// Populates the metadata schema from extracted text (LLM call).
///
/// Returns a raw structured map; the pipeline validates it against the
/// schema and falls back to base metadata on any failure.
#[async_trait]
pub trait MetadataEnricher: Send + Sync {
    async fn enrich(&self, text: &str, schema: &MetadataSchema) -> Result<serde_json::Value>;
}

/// Produces an embedding vector for a text under an explicit model.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, embedding_model: &str) -> Result<Vec<f32>>;
}

/// Produces a short summary used as the `summary` aspect.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;
}

/// The collaborator set one engine instance runs with.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub enricher: Arc<dyn MetadataEnricher>,
    pub embedder: Arc<dyn Embedder>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl Collaborators {
    /// Plain-text extraction only; everything else disabled.
    ///
    /// What the CLI runs with until real collaborators are wired in:
    /// documents are persisted, embedding aspects are skipped with
    /// warnings, and search over previously indexed content degrades
    /// to the keyword branch.
    pub fn disabled() -> Self {
        Self {
            extractor: Arc::new(PlainTextExtractor),
            enricher: Arc::new(DisabledEnricher),
            embedder: Arc::new(DisabledEmbedder),
            summarizer: Arc::new(DisabledSummarizer),
        }
    }
}

/// Await a collaborator call under the configured timeout.
///
/// Timeout and call failure collapse into the same error shape; the
/// pipeline treats them identically.
pub async fn call_with_timeout<T, F>(
    service: &'static str,
    timeout: Duration,
    fut: F,
) -> SiftResult<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SiftError::external(service, err)),
        Err(_) => Err(SiftError::ExternalService {
            service,
            reason: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

/// Accepts `text/*` payloads as UTF-8; everything else needs a real
/// OCR/parsing collaborator.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, raw: &[u8], mime_type: &str) -> Result<String> {
        if mime_type != "text/plain" && !mime_type.starts_with("text/") {
            bail!("unsupported mime type: {}", mime_type);
        }
        Ok(String::from_utf8(raw.to_vec())?)
    }
}

pub struct DisabledEnricher;

#[async_trait]
impl MetadataEnricher for DisabledEnricher {
    async fn enrich(&self, _text: &str, _schema: &MetadataSchema) -> Result<serde_json::Value> {
        bail!("metadata enrichment is not configured")
    }
}

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    async fn embed(&self, _text: &str, _embedding_model: &str) -> Result<Vec<f32>> {
        bail!("embedding generation is not configured")
    }
}

pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String> {
        bail!("summarization is not configured")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_extractor() {
        let ex = PlainTextExtractor;
        let text = ex.extract(b"hello", "text/plain").await.unwrap();
        assert_eq!(text, "hello");
        assert!(ex.extract(b"%PDF-1.4", "application/pdf").await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_external_service() {
        let result: SiftResult<()> = call_with_timeout("enricher", Duration::from_millis(10), {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .await;
        match result {
            Err(SiftError::ExternalService { service, reason }) => {
                assert_eq!(service, "enricher");
                assert!(reason.contains("timed out"));
            }
            other => panic!("expected timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_maps_to_external_service() {
        let result: SiftResult<()> =
            call_with_timeout("embedder", Duration::from_secs(5), async {
                bail!("boom")
            })
            .await;
        assert!(matches!(result, Err(SiftError::ExternalService { .. })));
    }
}

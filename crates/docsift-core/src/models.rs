//! Core data models used throughout docsift.
//!
//! These types represent the source items, documents, embeddings, and
//! ingestion reports that flow through the pipeline and stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SiftError;
use crate::metadata::DocumentMetadata;

/// Origin system of an ingested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Email,
    Pdf,
    Note,
    Image,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Email => "email",
            SourceType::Pdf => "pdf",
            SourceType::Note => "note",
            SourceType::Image => "image",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceType {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(SourceType::Email),
            "pdf" => Ok(SourceType::Pdf),
            "note" => Ok(SourceType::Note),
            "image" => Ok(SourceType::Image),
            other => Err(SiftError::Validation(format!(
                "unknown source type: '{}'",
                other
            ))),
        }
    }
}

/// Named facet of a document that can receive its own embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingType {
    Title,
    Summary,
    ContentChunk,
    OcrText,
    ImageVector,
}

impl EmbeddingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingType::Title => "title",
            EmbeddingType::Summary => "summary",
            EmbeddingType::ContentChunk => "content_chunk",
            EmbeddingType::OcrText => "ocr_text",
            EmbeddingType::ImageVector => "image_vector",
        }
    }
}

impl std::fmt::Display for EmbeddingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingType {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(EmbeddingType::Title),
            "summary" => Ok(EmbeddingType::Summary),
            "content_chunk" => Ok(EmbeddingType::ContentChunk),
            "ocr_text" => Ok(EmbeddingType::OcrText),
            "image_vector" => Ok(EmbeddingType::ImageVector),
            other => Err(SiftError::Validation(format!(
                "unknown embedding type: '{}'",
                other
            ))),
        }
    }
}

/// Raw item handed to the ingestion pipeline.
///
/// Either `text` is already extracted, or `raw` + `mime_type` are set and
/// the text-extraction collaborator produces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub source_type: SourceType,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Already-extracted plain text, when the origin provides it.
    #[serde(default)]
    pub text: Option<String>,
    /// Raw bytes needing extraction (scanned PDF, image).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// OCR output, embedded separately when distinct from the main text.
    #[serde(default)]
    pub ocr_text: Option<String>,
    /// Minimal step-1 metadata (filename, headers), the enrichment fallback.
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// Normalized document persisted by the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source_type: SourceType,
    /// Natural key from the origin system; unique across documents when set.
    pub source_id: Option<String>,
    pub source_uri: Option<String>,
    pub title: Option<String>,
    /// Origin timestamp.
    pub created_at: DateTime<Utc>,
    /// Ingestion timestamp.
    pub added_at: DateTime<Utc>,
    pub metadata: DocumentMetadata,
}

/// One embedding row, owned by exactly one document.
///
/// `chunk_index` 0 is reserved for document-level aspects (title, summary,
/// OCR text); content chunks count from 1. `(document_id, chunk_index,
/// embedding_type)` is unique.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub embedding_type: EmbeddingType,
    /// Source text; None for non-text embeddings such as image vectors.
    pub content: Option<String>,
    pub vector: Vec<f32>,
    pub embedding_model: String,
    /// SHA-256 of the source text, for re-ingestion change detection.
    pub content_hash: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Identifies one aspect of a document: `(embedding_type, chunk_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AspectRef {
    pub embedding_type: EmbeddingType,
    pub chunk_index: i64,
}

impl AspectRef {
    pub fn new(embedding_type: EmbeddingType, chunk_index: i64) -> Self {
        Self {
            embedding_type,
            chunk_index,
        }
    }
}

impl std::fmt::Display for AspectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.chunk_index == 0 {
            write!(f, "{}", self.embedding_type)
        } else {
            write!(f, "{}[{}]", self.embedding_type, self.chunk_index)
        }
    }
}

/// Pipeline stage that produced a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Extraction,
    MetadataEnrichment,
    Summarization,
    Embedding,
}

/// A non-fatal failure recorded during ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestWarning {
    pub stage: IngestStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<AspectRef>,
    pub message: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub document_id: String,
    /// Aspects whose embeddings were (re)generated and stored this run.
    pub stored_aspects: Vec<AspectRef>,
    /// Aspects skipped because their content hash was unchanged.
    pub unchanged_aspects: Vec<AspectRef>,
    pub warnings: Vec<IngestWarning>,
}

impl IngestionReport {
    /// True when the run wrote nothing (full idempotent no-op).
    pub fn is_noop(&self) -> bool {
        self.stored_aspects.is_empty() && !self.unchanged_aspects.is_empty()
    }
}

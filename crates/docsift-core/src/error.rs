//! Error taxonomy shared by the stores, pipeline, and engine.
//!
//! The variants map onto how each failure is handled: validation and
//! external-service failures are recovered per-aspect during ingestion,
//! conflicts and not-found are surfaced to the caller as decision points,
//! and model errors are rejected before any write happens.

use thiserror::Error;

/// Result alias used throughout docsift.
pub type SiftResult<T> = Result<T, SiftError>;

#[derive(Debug, Error)]
pub enum SiftError {
    /// A structured value (enriched metadata, a source item) failed
    /// schema validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An external collaborator call failed or timed out.
    #[error("{service} call failed: {reason}")]
    ExternalService {
        service: &'static str,
        reason: String,
    },

    /// A document with this `source_id` already exists and the caller
    /// selected the reject policy.
    #[error("source_id '{source_id}' already ingested as document {existing_id}")]
    Conflict {
        source_id: String,
        existing_id: String,
    },

    /// Lookup or delete on an id that does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Unregistered embedding model, or a vector whose length does not
    /// match the registered dimension.
    #[error("embedding model error: {0}")]
    Model(String),

    /// Underlying storage failure (SQL, serialization, I/O).
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SiftError {
    /// Wrap a collaborator error, preserving the service name for reports.
    pub fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        SiftError::ExternalService {
            service,
            reason: err.to_string(),
        }
    }

    /// True for failures that ingestion records as per-aspect warnings
    /// instead of aborting the item.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SiftError::ExternalService { .. } | SiftError::Validation(_) | SiftError::Model(_)
        )
    }
}

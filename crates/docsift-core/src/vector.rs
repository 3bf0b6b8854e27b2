//! Vector codecs, distance metrics, and the embedding-model registry.
//!
//! Vectors of different models (and therefore different dimensions) share
//! one logical store. Every vector operation passes `embedding_model`
//! explicitly; the [`ModelRegistry`] maps a model name to its dimension
//! and distance metric, so index selection is a capability lookup and a
//! vector can never be compared against one from another model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{SiftError, SiftResult};

/// Distance metric used for a model's similarity search.
///
/// All metrics are exposed as similarities: higher is better. Euclidean
/// distance is negated so ranking code never needs per-metric branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclidean,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    /// Similarity between two vectors of equal length; higher is better.
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Dot => dot_product(a, b),
            DistanceMetric::Euclidean => -euclidean_distance(a, b),
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Registered capabilities of one embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub dims: usize,
    pub metric: DistanceMetric,
}

/// Maps `embedding_model -> {dimension, distance_metric}`.
///
/// The registry is consulted on every write and every vector query. A
/// vector whose length disagrees with the registration is rejected before
/// it reaches storage.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Re-registering with the same spec is a no-op;
    /// a conflicting spec is an error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        dims: usize,
        metric: DistanceMetric,
    ) -> SiftResult<()> {
        let name = name.into();
        if dims == 0 {
            return Err(SiftError::Model(format!(
                "model '{}' registered with zero dimensions",
                name
            )));
        }
        let spec = ModelSpec { dims, metric };
        if let Some(existing) = self.models.get(&name) {
            if *existing != spec {
                return Err(SiftError::Model(format!(
                    "model '{}' already registered with dims={} metric={}",
                    name,
                    existing.dims,
                    existing.metric.as_str()
                )));
            }
            return Ok(());
        }
        self.models.insert(name, spec);
        Ok(())
    }

    pub fn spec(&self, model: &str) -> SiftResult<ModelSpec> {
        self.models
            .get(model)
            .copied()
            .ok_or_else(|| SiftError::Model(format!("unregistered embedding model: '{}'", model)))
    }

    /// Look up the model and verify the vector's length against it.
    pub fn check_vector(&self, model: &str, vector: &[f32]) -> SiftResult<ModelSpec> {
        let spec = self.spec(model)?;
        if vector.len() != spec.dims {
            return Err(SiftError::Model(format!(
                "vector of length {} does not match model '{}' (dims={})",
                vector.len(),
                model,
                spec.dims
            )));
        }
        Ok(spec)
    }

    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

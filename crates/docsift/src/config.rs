//! TOML configuration loading and validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use docsift_core::metadata::{MetadataKind, MetadataSchema};
use docsift_core::vector::{DistanceMetric, ModelRegistry};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Registered embedding models; every vector operation names one.
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    /// Overrides the standard metadata schema when present.
    #[serde(default)]
    pub metadata_schema: Option<BTreeMap<String, MetadataKind>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant. Carried from the source material as
    /// policy; nothing here tunes it.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Candidates fetched per branch before fusion.
    #[serde(default = "default_candidate_window")]
    pub candidate_window: usize,
    /// Default result count when a query does not set one.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            candidate_window: default_candidate_window(),
            top_k: default_top_k(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_window() -> usize {
    50
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Worker-pool bound for concurrent ingestion; the backpressure
    /// toward the external collaborators.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Timeout applied to every collaborator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Model the CLI uses when a command does not name one.
    #[serde(default)]
    pub default_model: Option<String>,
    /// Ask the summarizer for a summary aspect during ingestion.
    #[serde(default)]
    pub generate_summaries: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            call_timeout_secs: default_call_timeout_secs(),
            default_model: None,
            generate_summaries: false,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_call_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub dims: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl Config {
    /// Build the model registry from the `[[models]]` entries.
    pub fn registry(&self) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::new();
        for model in &self.models {
            registry
                .register(&model.name, model.dims, model.metric)
                .with_context(|| format!("invalid model entry '{}'", model.name))?;
        }
        Ok(registry)
    }

    /// The metadata schema enrichment output is validated against.
    pub fn metadata_schema(&self) -> MetadataSchema {
        match &self.metadata_schema {
            Some(fields) => MetadataSchema::new(fields.clone()),
            None => MetadataSchema::standard(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_window < 1 {
        anyhow::bail!("retrieval.candidate_window must be >= 1");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    if config.pipeline.max_concurrency < 1 {
        anyhow::bail!("pipeline.max_concurrency must be >= 1");
    }
    if config.pipeline.call_timeout_secs < 1 {
        anyhow::bail!("pipeline.call_timeout_secs must be >= 1");
    }
    for model in &config.models {
        if model.dims == 0 {
            anyhow::bail!("models entry '{}' must have dims > 0", model.name);
        }
    }
    if let Some(default_model) = &config.pipeline.default_model {
        if !config.models.iter().any(|m| &m.name == default_model) {
            anyhow::bail!(
                "pipeline.default_model '{}' is not in [[models]]",
                default_model
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sift.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let (_dir, path) = write_config("[db]\npath = \"data/sift.sqlite\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.max_chars, 2000);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.retrieval.candidate_window, 50);
        assert_eq!(config.pipeline.max_concurrency, 4);
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_model_entries_build_registry() {
        let (_dir, path) = write_config(
            r#"
[db]
path = "data/sift.sqlite"

[pipeline]
default_model = "stub-embed-8"

[[models]]
name = "stub-embed-8"
dims = 8

[[models]]
name = "big"
dims = 1536
metric = "dot"
"#,
        );
        let config = load_config(&path).unwrap();
        let registry = config.registry().unwrap();
        assert_eq!(registry.spec("stub-embed-8").unwrap().dims, 8);
        assert_eq!(
            registry.spec("big").unwrap().metric,
            DistanceMetric::Dot
        );
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let (_dir, path) = write_config(
            "[db]\npath = \"x.sqlite\"\n\n[pipeline]\ndefault_model = \"nope\"\n",
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_zero_max_chars_rejected() {
        let (_dir, path) =
            write_config("[db]\npath = \"x.sqlite\"\n\n[chunking]\nmax_chars = 0\n");
        assert!(load_config(&path).is_err());
    }
}

//! # docsift CLI (`sift`)
//!
//! The `sift` binary is the reference front end for the engine. It
//! provides commands for database initialization, descriptor ingestion,
//! hybrid search, document retrieval, deletion, and store statistics.
//!
//! ## Usage
//!
//! ```bash
//! sift --config ./sift.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sift init` | Create the SQLite database and run schema migrations |
//! | `sift ingest <descriptor.json>...` | Ingest source-item descriptor files |
//! | `sift search "<query>"` | Hybrid search over indexed documents |
//! | `sift get <id>` | Retrieve a document and its embedding inventory |
//! | `sift delete <id>` | Delete a document (cascades to embeddings) |
//! | `sift stats` | Row counts per table and per embedding model |
//!
//! Until real collaborators are wired in, the CLI runs with the
//! disabled set: documents are persisted with warnings for the skipped
//! embedding aspects, and search over previously indexed content
//! degrades to the keyword branch.

mod collaborators;
mod config;
mod db;
mod engine;
mod migrate;
mod pipeline;
mod search;
mod sqlite_store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use docsift_core::models::{SourceItem, SourceType};
use docsift_core::query::{MetadataFilter, SearchQuery};
use docsift_core::store::ConflictPolicy;

use collaborators::Collaborators;
use config::Config;
use engine::Engine;
use pipeline::IngestOptions;
use sqlite_store::SqliteStore;

/// docsift CLI — a local-first personal-document ingestion and hybrid
/// retrieval engine.
#[derive(Parser)]
#[command(name = "sift", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "sift.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the SQLite database and run schema migrations.
    Init,
    /// Ingest one or more source-item descriptor files (JSON).
    Ingest {
        files: Vec<PathBuf>,
        /// Embedding model to store vectors under.
        #[arg(long)]
        model: Option<String>,
        /// Fail on an already-ingested source_id instead of updating it.
        #[arg(long)]
        reject_duplicates: bool,
    },
    /// Search indexed documents (vector + keyword, fused by RRF).
    Search {
        /// Natural-language text for the semantic branch.
        query: Option<String>,
        /// Keyword terms for the full-text branch (repeatable).
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        /// Only return documents of this source type.
        #[arg(long)]
        source_type: Option<String>,
        /// Only return documents created on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,
        /// Only return documents created on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,
        /// Embedding model for the query vector.
        #[arg(long)]
        model: Option<String>,
        /// Maximum results.
        #[arg(long)]
        limit: Option<usize>,
        /// Return every matching embedding instead of the best per document.
        #[arg(long)]
        no_dedup: bool,
        /// Emit JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },
    /// Retrieve a document and its embedding inventory by id.
    Get {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a document; cascades to its embeddings.
    Delete { id: String },
    /// Row counts per table and per embedding model.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Diagnostics on stderr so stdout stays parseable for scripts.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest {
            files,
            model,
            reject_duplicates,
        } => run_ingest(&config, files, model, reject_duplicates).await,
        Commands::Search {
            query,
            keywords,
            source_type,
            since,
            until,
            model,
            limit,
            no_dedup,
            json,
        } => {
            run_search(
                &config,
                query,
                keywords,
                source_type,
                since,
                until,
                model,
                limit,
                no_dedup,
                json,
            )
            .await
        }
        Commands::Get { id, json } => run_get(&config, &id, json).await,
        Commands::Delete { id } => run_delete(&config, &id).await,
        Commands::Stats => run_stats(&config).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(&config.db.path).await?;
    Ok(Arc::new(SqliteStore::new(pool, config.registry()?)))
}

fn build_engine(config: &Config, store: Arc<SqliteStore>) -> Engine<SqliteStore> {
    Engine::new(store, Collaborators::disabled(), config)
}

fn resolve_model(config: &Config, model: Option<String>) -> String {
    model
        .or_else(|| config.pipeline.default_model.clone())
        .unwrap_or_default()
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    println!("initialized {}", config.db.path.display());
    pool.close().await;
    Ok(())
}

async fn run_ingest(
    config: &Config,
    files: Vec<PathBuf>,
    model: Option<String>,
    reject_duplicates: bool,
) -> Result<()> {
    if files.is_empty() {
        bail!("no descriptor files given");
    }

    let mut items = Vec::with_capacity(files.len());
    for file in &files {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read descriptor: {}", file.display()))?;
        let item: SourceItem = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse descriptor: {}", file.display()))?;
        items.push(item);
    }

    let store = open_store(config).await?;
    let engine = build_engine(config, store);

    let mut opts = IngestOptions::new(resolve_model(config, model));
    if reject_duplicates {
        opts.conflict_policy = ConflictPolicy::Reject;
    }
    opts.generate_summary = config.pipeline.generate_summaries;

    let reports = engine.ingest_batch(items, &opts).await;

    let mut failed = 0usize;
    for (file, report) in files.iter().zip(reports.iter()) {
        match report {
            Ok(report) => {
                println!(
                    "ok {} document={} stored={} unchanged={} warnings={}",
                    file.display(),
                    report.document_id,
                    report.stored_aspects.len(),
                    report.unchanged_aspects.len(),
                    report.warnings.len()
                );
                for warning in &report.warnings {
                    eprintln!("  warning: {}", warning.message);
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("failed {}: {}", file.display(), err);
            }
        }
    }

    if failed == files.len() {
        bail!("all {} items failed", failed);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    config: &Config,
    query: Option<String>,
    keywords: Vec<String>,
    source_type: Option<String>,
    since: Option<String>,
    until: Option<String>,
    model: Option<String>,
    limit: Option<usize>,
    no_dedup: bool,
    json: bool,
) -> Result<()> {
    let mut filters = Vec::new();
    if let Some(st) = source_type {
        filters.push(MetadataFilter::SourceType(st.parse::<SourceType>()?));
    }
    if let Some(since) = since {
        let date = NaiveDate::parse_from_str(&since, "%Y-%m-%d")?;
        filters.push(MetadataFilter::CreatedAfter(
            date.and_hms_opt(0, 0, 0).unwrap().and_utc(),
        ));
    }
    if let Some(until) = until {
        let date = NaiveDate::parse_from_str(&until, "%Y-%m-%d")?;
        filters.push(MetadataFilter::CreatedBefore(
            date.and_hms_opt(23, 59, 59).unwrap().and_utc(),
        ));
    }

    let search_query = SearchQuery {
        semantic_text: query,
        keywords,
        filters,
        embedding_model: resolve_model(config, model),
        target_embedding_types: None,
        top_k: limit.unwrap_or(config.retrieval.top_k),
        deduplicate_by_document: !no_dedup,
    };

    let store = open_store(config).await?;
    let engine = build_engine(config, store);
    let results = engine.search(&search_query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in results.iter().enumerate() {
        let title = item.title.as_deref().unwrap_or("(untitled)");
        let snippet = item
            .matched_content
            .as_deref()
            .map(|c| c.chars().take(80).collect::<String>())
            .unwrap_or_default();
        println!(
            "{:>2}. [{:.4}] {} ({}, {}, {})",
            i + 1,
            item.rrf_score,
            title,
            item.source_type,
            item.embedding_type,
            item.created_at.format("%Y-%m-%d"),
        );
        println!("    id: {}", item.document_id);
        if !snippet.is_empty() {
            println!("    {}", snippet);
        }
    }
    Ok(())
}

async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let engine = build_engine(config, store);
    let view = engine.get_document(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let doc = &view.document;
    println!("id:          {}", doc.id);
    println!("source_type: {}", doc.source_type);
    if let Some(source_id) = &doc.source_id {
        println!("source_id:   {}", source_id);
    }
    if let Some(source_uri) = &doc.source_uri {
        println!("source_uri:  {}", source_uri);
    }
    if let Some(title) = &doc.title {
        println!("title:       {}", title);
    }
    println!("created_at:  {}", doc.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("added_at:    {}", doc.added_at.format("%Y-%m-%dT%H:%M:%SZ"));
    if !doc.metadata.is_empty() {
        println!("metadata:    {}", serde_json::to_string(&doc.metadata)?);
    }
    println!("embeddings:  {}", view.embeddings.len());
    for info in &view.embeddings {
        println!(
            "  {:>3} {:<14} {}",
            info.chunk_index, info.embedding_type, info.embedding_model
        );
    }
    Ok(())
}

async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config).await?;
    let engine = build_engine(config, store);
    engine.delete(id).await?;
    println!("deleted {}", id);
    Ok(())
}

async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;
    println!("documents:  {}", stats.documents);
    println!("embeddings: {}", stats.embeddings);
    for (model, count) in &stats.embeddings_per_model {
        println!("  {:<24} {}", model, count);
    }
    Ok(())
}

//! # codescope CLI
//!
//! Commands for registering projects, building their vector indexes, and
//! querying them, plus `serve` for the HTTP API. All commands accept a
//! `--config` flag pointing to a TOML configuration file; a missing file
//! falls back to built-in defaults.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `codescope serve` | Start the JSON HTTP API |
//! | `codescope projects` | List registered projects |
//! | `codescope create <path>` | Register a project directory |
//! | `codescope index <project-id>` | Index a project (incremental by default) |
//! | `codescope search <project-id> <query>` | Semantic search over a project |
//! | `codescope delete <project-id>` | Remove a project and its store |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use codescope::completion::{
    CompletionProvider, DisabledCompletionProvider, HttpCompletionProvider,
};
use codescope::config::{load_config, Config};
use codescope::embedding::{
    DisabledEmbeddingProvider, EmbeddingProvider, HttpEmbeddingProvider,
};
use codescope::registry::Registry;
use codescope::server::{run_server, AppState};

/// codescope — a local RAG backend for codebases.
#[derive(Parser)]
#[command(
    name = "codescope",
    about = "codescope — local retrieval-augmented search and Q&A over your codebases",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./codescope.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the JSON HTTP API server.
    Serve,

    /// List registered projects.
    Projects,

    /// Register a project directory (idempotent by path).
    Create {
        /// Path to the project root.
        path: String,
        /// Display name; defaults to the directory basename.
        #[arg(long)]
        name: Option<String>,
    },

    /// Index a project. Incremental by default: unchanged files are skipped
    /// by content hash.
    Index {
        project_id: String,
        /// Re-chunk and re-embed every file regardless of hashes.
        #[arg(long)]
        full: bool,
    },

    /// Semantic search over a project's indexed chunks.
    Search {
        project_id: String,
        query: String,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },

    /// Delete a project registration and its store database.
    Delete { project_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        Config::default()
    };

    let registry = Arc::new(Registry::connect(&config.storage.dir).await?);

    let embedder: Arc<dyn EmbeddingProvider> =
        if config.provider.api_url.is_some() && config.provider.embedding_model.is_some() {
            Arc::new(HttpEmbeddingProvider::new(&config.provider)?)
        } else {
            Arc::new(DisabledEmbeddingProvider)
        };
    let completer: Arc<dyn CompletionProvider> =
        if config.provider.api_url.is_some() && config.provider.completion_model.is_some() {
            Arc::new(HttpCompletionProvider::new(&config.provider)?)
        } else {
            Arc::new(DisabledCompletionProvider)
        };

    let state = AppState::new(&config, registry, embedder, completer);

    match cli.command {
        Commands::Serve => {
            run_server(&config, state).await?;
        }

        Commands::Projects => {
            let projects = state.registry.list().await?;
            if projects.is_empty() {
                println!("No projects registered.");
            } else {
                for p in projects {
                    let indexed = p
                        .last_indexed_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "never".to_string());
                    println!(
                        "{}  {:<10}  {}  (indexed: {})",
                        p.id,
                        p.status.as_str(),
                        p.path,
                        indexed
                    );
                    if let Some(message) = p.status.error_message() {
                        println!("    error: {message}");
                    }
                }
            }
        }

        Commands::Create { path, name } => {
            let project = state.registry.create_or_get(&path, name).await?;
            println!("Registered project {} ({})", project.id, project.name);
            println!("  path:  {}", project.path);
            println!("  store: {}", project.database_path);
        }

        Commands::Index { project_id, full } => {
            println!(
                "Indexing {} ({})...",
                project_id,
                if full { "full" } else { "incremental" }
            );
            let summary = state.indexer.run_blocking(&project_id, full).await?;
            println!(
                "Done: {} files indexed, {} unchanged, {} removed, {} chunks embedded, {} skipped (too large)",
                summary.files_indexed,
                summary.files_skipped,
                summary.files_removed,
                summary.chunks_embedded,
                summary.skipped_oversize
            );
        }

        Commands::Search {
            project_id,
            query,
            top_k,
        } => {
            let hits = state.retrieval.search(&project_id, &query, top_k).await?;
            if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. {} (chunk {}, score {:.4})",
                        i + 1,
                        hit.path,
                        hit.chunk_index,
                        hit.score
                    );
                    for line in hit.content.lines().take(3) {
                        println!("     {line}");
                    }
                }
            }
        }

        Commands::Delete { project_id } => {
            state.registry.delete(&project_id).await?;
            println!("Deleted project {project_id}");
        }
    }

    Ok(())
}

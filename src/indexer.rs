//! Background indexing runs.
//!
//! A run enumerates the project tree, diffs file content hashes against the
//! store, re-chunks and re-embeds what changed, removes vanished files, and
//! finishes by refreshing cached dependencies and project status. The
//! `created/ready/error → indexing` transition is committed CAS-style in the
//! registry, so at most one run per project is in flight; a second trigger
//! while indexing is rejected.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use crate::cache::CacheLayer;
use crate::chunk::chunk_source;
use crate::config::IndexingConfig;
use crate::deps;
use crate::embedding::EmbeddingProvider;
use crate::error::ApiError;
use crate::models::Project;
use crate::registry::Registry;
use crate::scan::scan_project;
use crate::store;

/// Counters reported after a run completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub files_indexed: u64,
    pub files_skipped: u64,
    pub files_removed: u64,
    pub chunks_embedded: u64,
    pub skipped_oversize: u64,
}

#[derive(Clone)]
pub struct Indexer {
    registry: Arc<Registry>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<CacheLayer>,
    config: IndexingConfig,
}

impl Indexer {
    pub fn new(
        registry: Arc<Registry>,
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<CacheLayer>,
        config: IndexingConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            cache,
            config,
        }
    }

    /// Trigger a background run. Returns as soon as the state transition is
    /// committed; progress is observable through project status.
    pub async fn start(&self, project_id: &str, full: bool) -> Result<(), ApiError> {
        let project = self.registry.get(project_id).await?;

        if !self.registry.begin_indexing(&project.id).await? {
            return Err(ApiError::validation(format!(
                "Project {} is already being indexed",
                project.id
            )));
        }

        let indexer = self.clone();
        tokio::spawn(async move {
            indexer.execute(project, full).await;
        });
        Ok(())
    }

    /// Run to completion in the calling task. Used by the CLI; the server
    /// goes through [`Indexer::start`].
    pub async fn run_blocking(&self, project_id: &str, full: bool) -> Result<RunSummary, ApiError> {
        let project = self.registry.get(project_id).await?;
        if !self.registry.begin_indexing(&project.id).await? {
            return Err(ApiError::validation(format!(
                "Project {} is already being indexed",
                project.id
            )));
        }

        match self.run(&project, full).await {
            Ok(summary) => {
                self.finish_ok(&project.id).await;
                Ok(summary)
            }
            Err(err) => {
                self.finish_err(&project.id, &err).await;
                Err(ApiError::Internal(err))
            }
        }
    }

    async fn execute(&self, project: Project, full: bool) {
        let id = project.id.clone();
        match self.run(&project, full).await {
            Ok(summary) => {
                tracing::info!(
                    project_id = %id,
                    files_indexed = summary.files_indexed,
                    files_skipped = summary.files_skipped,
                    files_removed = summary.files_removed,
                    chunks_embedded = summary.chunks_embedded,
                    "index run complete"
                );
                self.finish_ok(&id).await;
            }
            Err(err) => {
                tracing::error!(project_id = %id, error = %err, "index run failed");
                self.finish_err(&id, &err).await;
            }
        }
    }

    async fn finish_ok(&self, id: &str) {
        if let Err(err) = self.registry.mark_ready(id).await {
            tracing::error!(project_id = %id, error = %err, "failed to mark project ready");
        }
        self.cache.invalidate_scope(id);
    }

    async fn finish_err(&self, id: &str, run_err: &anyhow::Error) {
        if let Err(err) = self.registry.mark_error(id, &run_err.to_string()).await {
            tracing::error!(project_id = %id, error = %err, "failed to record index error");
        }
        self.cache.invalidate_scope(id);
    }

    async fn run(&self, project: &Project, full: bool) -> Result<RunSummary> {
        let pool = self.registry.store_pool(project).await?;
        let root = Path::new(&project.path);

        if full {
            store::clear_dependencies(&pool).await?;
        }

        let stored = store::file_hashes(&pool).await?;
        let scan = scan_project(root, self.config.max_file_size, &self.config.exclude_globs)?;

        let mut summary = RunSummary {
            skipped_oversize: scan.skipped_oversize,
            ..Default::default()
        };
        let mut seen: std::collections::HashSet<String> =
            std::collections::HashSet::with_capacity(scan.files.len());

        for file in &scan.files {
            // A deleted project stops its run quietly.
            if !self.registry.exists(&project.id).await? {
                tracing::info!(project_id = %project.id, "project deleted, aborting index run");
                return Ok(summary);
            }

            seen.insert(file.rel_path.clone());

            let content = match std::fs::read_to_string(root.join(&file.rel_path)) {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(path = %file.rel_path, error = %err, "skipping unreadable file");
                    continue;
                }
            };

            let content_hash = sha256_hex(&content);
            if !full {
                if let Some((_, stored_hash)) = stored.get(&file.rel_path) {
                    if *stored_hash == content_hash {
                        summary.files_skipped += 1;
                        continue;
                    }
                }
            }

            let file_id = store::upsert_file(
                &pool,
                &file.rel_path,
                &content_hash,
                file.size as i64,
                &file.language,
            )
            .await?;
            store::delete_chunks(&pool, file_id).await?;

            let chunks = chunk_source(
                &content,
                self.config.chunk_max_chars,
                self.config.chunk_overlap_chars,
            );
            summary.chunks_embedded += self.embed_and_store(&pool, file_id, &chunks).await?;
            summary.files_indexed += 1;
        }

        // Files that were indexed before but no longer exist on disk.
        for (path, (file_id, _)) in &stored {
            if !seen.contains(path) {
                store::delete_file(&pool, *file_id).await?;
                summary.files_removed += 1;
            }
        }

        let chunks = store::chunk_texts(&pool).await?;
        let dependencies = deps::extract(root, &chunks)?;
        store::replace_dependencies(&pool, &dependencies).await?;

        Ok(summary)
    }

    async fn embed_and_store(
        &self,
        pool: &sqlx::SqlitePool,
        file_id: i64,
        chunks: &[crate::chunk::CodeChunk],
    ) -> Result<u64> {
        let mut embedded = 0u64;
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .provider
                .embed(&texts)
                .await
                .context("Embedding provider call failed")?;

            for (chunk, vector) in batch.iter().zip(vectors.iter()) {
                store::upsert_chunk(
                    pool,
                    file_id,
                    chunk.chunk_index,
                    &chunk.content,
                    vector,
                    chunk.offset_start as i64,
                    chunk.offset_end as i64,
                )
                .await?;
                embedded += 1;
            }
        }
        Ok(embedded)
    }
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

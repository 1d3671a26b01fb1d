//! Project registry: one SQLite database tracking every registered project,
//! plus a pool per project store database.
//!
//! Project ids are derived from the normalized absolute path, so registering
//! the same directory twice is idempotent. Deletion closes and removes the
//! project's store database file.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::error::ApiError;
use crate::models::{Project, ProjectStatus};
use crate::store;

pub struct Registry {
    pool: SqlitePool,
    storage_dir: PathBuf,
    /// Serializes create_or_get so two concurrent registrations of the same
    /// path cannot race past the existence check.
    create_lock: Mutex<()>,
    project_pools: Mutex<HashMap<String, SqlitePool>>,
}

/// First 16 hex chars of the SHA-256 of the normalized absolute path.
pub fn project_id_for_path(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Validate and normalize a project path. Rejects empty paths, traversal
/// segments, missing paths, and non-directories.
pub fn validate_project_path(raw: &str) -> Result<PathBuf, ApiError> {
    if raw.trim().is_empty() {
        return Err(ApiError::validation("Project path must not be empty"));
    }
    if Path::new(raw)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ApiError::validation(
            "Project path must not contain '..' segments",
        ));
    }
    let path = Path::new(raw);
    let normalized = path
        .canonicalize()
        .map_err(|_| ApiError::validation(format!("Project path does not exist: {raw}")))?;
    if !normalized.is_dir() {
        return Err(ApiError::validation(format!(
            "Project path is not a directory: {raw}"
        )));
    }
    Ok(normalized)
}

async fn open_sqlite(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

impl Registry {
    /// Open (creating if needed) the registry database under `storage_dir`.
    pub async fn connect(storage_dir: &Path) -> Result<Self> {
        let pool = open_sqlite(&storage_dir.join("registry.db")).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                path TEXT NOT NULL UNIQUE,
                database_path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_indexed_at TEXT,
                status TEXT NOT NULL DEFAULT 'created',
                error_message TEXT,
                settings TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            storage_dir: storage_dir.to_path_buf(),
            create_lock: Mutex::new(()),
            project_pools: Mutex::new(HashMap::new()),
        })
    }

    /// Register a project, or return the existing registration for the same
    /// normalized path. `name` defaults to the directory basename.
    pub async fn create_or_get(
        &self,
        raw_path: &str,
        name: Option<String>,
    ) -> Result<Project, ApiError> {
        let normalized = validate_project_path(raw_path)?;
        let normalized_str = normalized.to_string_lossy().to_string();
        let id = project_id_for_path(&normalized_str);

        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.find(&id).await? {
            return Ok(existing);
        }

        let name = name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
            normalized
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| id.clone())
        });
        let database_path = self
            .storage_dir
            .join(format!("{id}.db"))
            .to_string_lossy()
            .to_string();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO projects (id, name, path, database_path, created_at, status, settings)
             VALUES (?, ?, ?, ?, ?, 'created', '{}')",
        )
        .bind(&id)
        .bind(&name)
        .bind(&normalized_str)
        .bind(&database_path)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!(project_id = %id, path = %normalized_str, "registered project");

        Ok(Project {
            id,
            name,
            path: normalized_str,
            database_path,
            created_at,
            last_indexed_at: None,
            status: ProjectStatus::Created,
            settings: "{}".to_string(),
        })
    }

    /// All projects, oldest registration first.
    pub async fn list(&self) -> Result<Vec<Project>, ApiError> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_project).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Project, ApiError> {
        self.find(id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Project not found: {id}")))
    }

    async fn find(&self, id: &str) -> Result<Option<Project>, ApiError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_project).transpose()
    }

    /// Whether the registry row still exists. Index runs poll this between
    /// files so a deleted project stops indexing quietly.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Remove a project: registry row, pooled connection, and store database
    /// file. An in-flight index run observes the missing row and aborts.
    pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
        let project = self.get(id).await?;

        if let Some(pool) = self.project_pools.lock().await.remove(id) {
            pool.close().await;
        }

        sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        for suffix in ["", "-wal", "-shm"] {
            let path = format!("{}{}", project.database_path, suffix);
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(%path, error = %err, "failed to remove store database file");
                }
            }
        }

        tracing::info!(project_id = %id, "deleted project");
        Ok(())
    }

    /// Pool for a project's store database, opened and migrated on first use.
    pub async fn store_pool(&self, project: &Project) -> Result<SqlitePool> {
        let mut pools = self.project_pools.lock().await;
        if let Some(pool) = pools.get(&project.id) {
            return Ok(pool.clone());
        }
        let pool = open_sqlite(Path::new(&project.database_path)).await?;
        store::migrate(&pool).await?;
        pools.insert(project.id.clone(), pool.clone());
        Ok(pool)
    }

    /// Compare-and-set transition into `indexing`. Returns false when the
    /// project is already indexing (or no longer exists).
    pub async fn begin_indexing(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE projects SET status = 'indexing', error_message = NULL
             WHERE id = ? AND status <> 'indexing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_ready(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE projects SET status = 'ready', error_message = NULL, last_indexed_at = ?
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE projects SET status = 'error', error_message = ? WHERE id = ?")
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Result<Project, ApiError> {
    let status: String = row.try_get("status")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let created_at: String = row.try_get("created_at")?;
    let last_indexed_at: Option<String> = row.try_get("last_indexed_at")?;

    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        database_path: row.try_get("database_path")?,
        created_at: parse_timestamp(&created_at)?,
        last_indexed_at: last_indexed_at.as_deref().map(parse_timestamp).transpose()?,
        status: ProjectStatus::from_parts(&status, error_message),
        settings: row.try_get("settings")?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Bad timestamp in registry: {e}")))
}

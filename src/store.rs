//! Per-project store database: files, chunks with embedding vectors, and
//! cached dependency rows.
//!
//! Top-k retrieval is an exact linear scan over stored vectors with cosine
//! similarity. Project chunk counts stay small enough that a scan beats the
//! operational cost of an approximate index.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Dependency, IndexingStats, SearchHit};

/// Create the store schema. Idempotent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            content_hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            language TEXT NOT NULL,
            last_indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            vector BLOB,
            offset_start INTEGER NOT NULL,
            offset_end INTEGER NOT NULL,
            UNIQUE (file_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dependencies (
            name TEXT NOT NULL,
            version TEXT,
            language TEXT NOT NULL,
            file_count INTEGER NOT NULL,
            transitive INTEGER NOT NULL,
            PRIMARY KEY (language, name, transitive)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert or refresh a file row, returning its id.
pub async fn upsert_file(
    pool: &SqlitePool,
    path: &str,
    content_hash: &str,
    size: i64,
    language: &str,
) -> Result<i64> {
    sqlx::query(
        r#"
        INSERT INTO files (path, content_hash, size, language, last_indexed_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (path) DO UPDATE SET
            content_hash = excluded.content_hash,
            size = excluded.size,
            language = excluded.language,
            last_indexed_at = excluded.last_indexed_at
        "#,
    )
    .bind(path)
    .bind(content_hash)
    .bind(size)
    .bind(language)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT id FROM files WHERE path = ?")
        .bind(path)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("id")?)
}

/// Map of relative path to (file_id, content_hash) for incremental diffing.
pub async fn file_hashes(pool: &SqlitePool) -> Result<HashMap<String, (i64, String)>> {
    let rows = sqlx::query("SELECT id, path, content_hash FROM files")
        .fetch_all(pool)
        .await?;
    let mut out = HashMap::with_capacity(rows.len());
    for row in rows {
        let path: String = row.try_get("path")?;
        let id: i64 = row.try_get("id")?;
        let hash: String = row.try_get("content_hash")?;
        out.insert(path, (id, hash));
    }
    Ok(out)
}

/// Remove a file and its chunks.
pub async fn delete_file(pool: &SqlitePool, file_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM files WHERE id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove all chunks for a file ahead of re-chunking.
pub async fn delete_chunks(pool: &SqlitePool, file_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM chunks WHERE file_id = ?")
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Insert or replace one chunk, idempotent per (file_id, chunk_index).
pub async fn upsert_chunk(
    pool: &SqlitePool,
    file_id: i64,
    chunk_index: i64,
    content: &str,
    vector: &[f32],
    offset_start: i64,
    offset_end: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO chunks (file_id, chunk_index, content, vector, offset_start, offset_end)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (file_id, chunk_index) DO UPDATE SET
            content = excluded.content,
            vector = excluded.vector,
            offset_start = excluded.offset_start,
            offset_end = excluded.offset_end
        "#,
    )
    .bind(file_id)
    .bind(chunk_index)
    .bind(content)
    .bind(vec_to_blob(vector))
    .bind(offset_start)
    .bind(offset_end)
    .execute(pool)
    .await?;
    Ok(())
}

/// Exact top-k by cosine similarity, descending. Ties break by rowid, so
/// insertion order is stable across identical scores.
pub async fn top_k(pool: &SqlitePool, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
    if k == 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.file_id, c.chunk_index, c.content, c.vector, f.path
        FROM chunks c JOIN files f ON f.id = c.file_id
        WHERE c.vector IS NOT NULL
        ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<(i64, SearchHit)> = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.try_get("vector")?;
        let vector = blob_to_vec(&blob);
        let score = cosine_similarity(query, &vector);
        let rowid: i64 = row.try_get("id")?;
        scored.push((
            rowid,
            SearchHit {
                file_id: row.try_get("file_id")?,
                path: row.try_get("path")?,
                chunk_index: row.try_get("chunk_index")?,
                score,
                content: row.try_get("content")?,
            },
        ));
    }

    scored.sort_by(|(a_id, a), (b_id, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a_id.cmp(b_id))
    });
    scored.truncate(k);
    Ok(scored.into_iter().map(|(_, hit)| hit).collect())
}

/// File and embedding counts.
pub async fn stats(pool: &SqlitePool) -> Result<IndexingStats> {
    let row = sqlx::query(
        "SELECT (SELECT COUNT(*) FROM files) AS file_count,
                (SELECT COUNT(*) FROM chunks WHERE vector IS NOT NULL) AS embedding_count",
    )
    .fetch_one(pool)
    .await?;
    let file_count: i64 = row.try_get("file_count")?;
    let embedding_count: i64 = row.try_get("embedding_count")?;
    Ok(IndexingStats {
        file_count,
        embedding_count,
        is_indexed: embedding_count > 0,
    })
}

/// Every stored chunk's (path, language, content), for dependency scanning.
pub async fn chunk_texts(pool: &SqlitePool) -> Result<Vec<(String, String, String)>> {
    let rows = sqlx::query(
        "SELECT f.path, f.language, c.content
         FROM chunks c JOIN files f ON f.id = c.file_id
         ORDER BY c.id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.try_get("path")?,
                row.try_get("language")?,
                row.try_get("content")?,
            ))
        })
        .collect()
}

/// Replace the cached dependency rows.
pub async fn replace_dependencies(pool: &SqlitePool, deps: &[Dependency]) -> Result<()> {
    sqlx::query("DELETE FROM dependencies").execute(pool).await?;
    for dep in deps {
        sqlx::query(
            "INSERT OR REPLACE INTO dependencies (name, version, language, file_count, transitive)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&dep.name)
        .bind(&dep.version)
        .bind(&dep.language)
        .bind(dep.file_count as i64)
        .bind(dep.transitive as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn clear_dependencies(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM dependencies").execute(pool).await?;
    Ok(())
}

/// Cached dependencies, direct only unless `include_transitive`.
pub async fn load_dependencies(
    pool: &SqlitePool,
    include_transitive: bool,
) -> Result<Vec<Dependency>> {
    let rows = sqlx::query(
        "SELECT name, version, language, file_count, transitive FROM dependencies
         WHERE transitive = 0 OR ? ORDER BY language, name",
    )
    .bind(include_transitive)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let file_count: i64 = row.try_get("file_count")?;
            let transitive: i64 = row.try_get("transitive")?;
            Ok(Dependency {
                name: row.try_get("name")?,
                version: row.try_get("version")?,
                language: row.try_get("language")?,
                file_count: file_count as u32,
                transitive: transitive != 0,
            })
        })
        .collect()
}

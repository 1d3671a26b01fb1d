//! Core data models shared across the registry, indexer, store, and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a project's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectStatus {
    Created,
    Indexing,
    Ready,
    Error { message: String },
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Indexing => "indexing",
            Self::Ready => "ready",
            Self::Error { .. } => "error",
        }
    }

    /// Rebuild a status from its stored string form. The error message is
    /// persisted separately in the registry row.
    pub fn from_parts(status: &str, error_message: Option<String>) -> Self {
        match status {
            "indexing" => Self::Indexing,
            "ready" => Self::Ready,
            "error" => Self::Error {
                message: error_message.unwrap_or_default(),
            },
            _ => Self::Created,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// A registered project: one row in the registry database, one store
/// database on disk.
#[derive(Debug, Clone)]
pub struct Project {
    /// First 16 hex chars of the SHA-256 of the normalized absolute path.
    pub id: String,
    pub name: String,
    pub path: String,
    pub database_path: String,
    pub created_at: DateTime<Utc>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
    pub settings: String,
}

/// A single top-k search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file_id: i64,
    pub path: String,
    pub chunk_index: i64,
    pub score: f32,
    pub content: String,
}

/// One extracted dependency, direct or transitive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub version: Option<String>,
    pub language: String,
    /// Distinct indexed files importing this dependency. Zero for entries
    /// discovered only through a lockfile.
    pub file_count: u32,
    pub transitive: bool,
}

/// Counts reported by project detail and stats endpoints.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexingStats {
    pub file_count: i64,
    pub embedding_count: i64,
    pub is_indexed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let statuses = [
            ProjectStatus::Created,
            ProjectStatus::Indexing,
            ProjectStatus::Ready,
        ];
        for s in statuses {
            assert_eq!(ProjectStatus::from_parts(s.as_str(), None), s);
        }
    }

    #[test]
    fn test_error_status_carries_message() {
        let s = ProjectStatus::from_parts("error", Some("embedding provider unreachable".into()));
        assert_eq!(s.as_str(), "error");
        assert_eq!(s.error_message(), Some("embedding provider unreachable"));
    }

    #[test]
    fn test_unknown_status_defaults_to_created() {
        assert_eq!(
            ProjectStatus::from_parts("bogus", None),
            ProjectStatus::Created
        );
    }
}

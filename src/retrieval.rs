//! Semantic search and retrieval-augmented answering.

use serde::Serialize;
use std::sync::Arc;

use crate::completion::CompletionProvider;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::ApiError;
use crate::models::SearchHit;
use crate::registry::Registry;
use crate::store;

/// Total characters of retrieved chunk content included in a RAG prompt.
const RETRIEVED_CONTEXT_LIMIT: usize = 4000;

const SYSTEM_PROMPT: &str = "You are a coding assistant answering questions about a local \
codebase. Ground your answer in the provided context snippets and say so when the context \
is insufficient.";

/// One snippet that made it into the composed prompt.
#[derive(Debug, Clone, Serialize)]
pub struct UsedContext {
    pub path: String,
    pub score: f32,
}

/// Result of a RAG answer request. Serialized under the `response` key
/// that `/code` clients read.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    #[serde(rename = "response")]
    pub completion: String,
    pub used_context: Vec<UsedContext>,
    pub project_id: Option<String>,
}

pub struct RetrievalEngine {
    registry: Arc<Registry>,
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
}

impl RetrievalEngine {
    pub fn new(
        registry: Arc<Registry>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            registry,
            embedder,
            completer,
        }
    }

    /// Top-k semantic search over one project's chunks.
    pub async fn search(
        &self,
        project_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ApiError> {
        if query.trim().is_empty() {
            return Err(ApiError::validation("Query must not be empty"));
        }
        let project = self.registry.get(project_id).await?;
        let pool = self.registry.store_pool(&project).await?;

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| ApiError::Provider(e.to_string()))?;

        Ok(store::top_k(&pool, &query_vec, top_k).await?)
    }

    /// Answer a prompt, optionally grounded in retrieved project context.
    ///
    /// With no project id the first registered project is used. A project
    /// without embeddings (or `use_rag = false`) degrades to a context-free
    /// completion rather than failing.
    pub async fn answer(
        &self,
        project_id: Option<&str>,
        prompt: &str,
        extra_context: Option<&str>,
        use_rag: bool,
        top_k: usize,
    ) -> Result<Answer, ApiError> {
        if prompt.trim().is_empty() {
            return Err(ApiError::validation("Prompt must not be empty"));
        }

        let project = match project_id {
            Some(id) => Some(self.registry.get(id).await?),
            None => self.registry.list().await?.into_iter().next(),
        };

        let mut used_context = Vec::new();
        let mut retrieved = String::new();

        if use_rag {
            if let Some(project) = &project {
                let pool = self.registry.store_pool(project).await?;
                let stats = store::stats(&pool).await?;
                if stats.embedding_count > 0 {
                    let query_vec = embed_query(self.embedder.as_ref(), prompt)
                        .await
                        .map_err(|e| ApiError::Provider(e.to_string()))?;
                    let hits = store::top_k(&pool, &query_vec, top_k).await?;
                    (retrieved, used_context) = compose_context(&hits, RETRIEVED_CONTEXT_LIMIT);
                } else {
                    tracing::debug!(project_id = %project.id, "no embeddings, answering without context");
                }
            }
        }

        let mut full_prompt = String::new();
        if !retrieved.is_empty() {
            full_prompt.push_str("Context from the codebase:\n\n");
            full_prompt.push_str(&retrieved);
            full_prompt.push('\n');
        }
        if let Some(extra) = extra_context.filter(|c| !c.trim().is_empty()) {
            full_prompt.push_str("Additional context:\n");
            full_prompt.push_str(extra);
            full_prompt.push_str("\n\n");
        }
        full_prompt.push_str(prompt);

        let completion = self
            .completer
            .complete(Some(SYSTEM_PROMPT), &full_prompt)
            .await
            .map_err(|e| ApiError::Provider(e.to_string()))?;

        Ok(Answer {
            completion,
            used_context,
            project_id: project.map(|p| p.id),
        })
    }
}

/// Pack hits into a bounded context block, best score first. Hits that do
/// not fit whole are dropped.
fn compose_context(hits: &[SearchHit], limit: usize) -> (String, Vec<UsedContext>) {
    let mut block = String::new();
    let mut used = Vec::new();

    for hit in hits {
        let snippet = format!(
            "--- {} (chunk {}) ---\n{}\n\n",
            hit.path, hit.chunk_index, hit.content
        );
        if block.len() + snippet.len() > limit {
            break;
        }
        block.push_str(&snippet);
        used.push(UsedContext {
            path: hit.path.clone(),
            score: hit.score,
        });
    }

    (block, used)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, score: f32, content: &str) -> SearchHit {
        SearchHit {
            file_id: 1,
            path: path.to_string(),
            chunk_index: 0,
            score,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_compose_respects_budget() {
        let hits = vec![
            hit("a.py", 0.9, &"x".repeat(100)),
            hit("b.py", 0.8, &"y".repeat(100)),
            hit("c.py", 0.7, &"z".repeat(100)),
        ];
        let (block, used) = compose_context(&hits, 260);
        assert!(block.len() <= 260);
        assert_eq!(used.len(), 2);
        assert_eq!(used[0].path, "a.py");
        assert_eq!(used[1].path, "b.py");
    }

    #[test]
    fn test_compose_used_context_scores_descending() {
        let hits = vec![hit("a.py", 0.9, "a"), hit("b.py", 0.5, "b")];
        let (_, used) = compose_context(&hits, 4000);
        assert!(used[0].score >= used[1].score);
    }

    #[test]
    fn test_compose_empty_hits() {
        let (block, used) = compose_context(&[], 4000);
        assert!(block.is_empty());
        assert!(used.is_empty());
    }
}

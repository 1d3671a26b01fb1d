//! JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/api/health` | Health check with feature list and cache stats |
//! | `POST`   | `/api/projects` | Register a project (idempotent by path) |
//! | `GET`    | `/api/projects` | List projects |
//! | `GET`    | `/api/projects/{id}` | Project detail with index statistics |
//! | `DELETE` | `/api/projects/{id}` | Delete a project and its store |
//! | `POST`   | `/api/projects/index` | Trigger a background index run |
//! | `GET`    | `/api/projects/{id}/dependencies` | Dependency graph by language |
//! | `POST`   | `/api/query` | Semantic search over one project |
//! | `POST`   | `/code` | RAG-grounded completion |
//!
//! Errors render as `{"error": message}`; rate-limit rejections add
//! `retry_after` and a `Retry-After` header. All origins are permitted, the
//! server is meant to stay on localhost.

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{CacheLayer, TTL_FILE, TTL_SEARCH, TTL_STATS};
use crate::completion::CompletionProvider;
use crate::config::Config;
use crate::deps;
use crate::embedding::EmbeddingProvider;
use crate::error::ApiError;
use crate::indexer::Indexer;
use crate::models::Project;
use crate::ratelimit::{LimitClass, RateLimiter};
use crate::registry::Registry;
use crate::retrieval::RetrievalEngine;
use crate::store;

const FEATURES: &[&str] = &[
    "rag",
    "per-project-db",
    "incremental-indexing",
    "rate-limiting",
    "caching",
    "dependency-graph",
];

const DEFAULT_TOP_K: usize = 5;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub indexer: Arc<Indexer>,
    pub retrieval: Arc<RetrievalEngine>,
    pub cache: Arc<CacheLayer>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the engine components together from configuration and provider
    /// implementations.
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let cache = Arc::new(CacheLayer::new(config.cache.capacity));
        let indexer = Arc::new(Indexer::new(
            registry.clone(),
            embedder.clone(),
            cache.clone(),
            config.indexing.clone(),
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            registry.clone(),
            embedder,
            completer,
        ));
        Self {
            registry,
            indexer,
            retrieval,
            cache,
            limiter: Arc::new(RateLimiter::new()),
        }
    }
}

/// Build the API router. Exposed separately from [`run_server`] so tests can
/// serve it on an ephemeral port.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handle_health))
        .route(
            "/api/projects",
            post(handle_create_project).get(handle_list_projects),
        )
        .route("/api/projects/index", post(handle_index))
        .route(
            "/api/projects/{id}",
            get(handle_get_project).delete(handle_delete_project),
        )
        .route("/api/projects/{id}/dependencies", get(handle_dependencies))
        .route("/api/query", post(handle_query))
        .route("/code", post(handle_code))
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the configured address and serve until the
/// process terminates.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(state);

    println!("codescope API listening on http://{bind_addr}");
    tracing::info!(%bind_addr, "server starting");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Client IP for rate limiting: first `X-Forwarded-For` hop, else the
/// socket address.
fn client_ip(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn admit(
    state: &AppState,
    headers: &HeaderMap,
    addr: &SocketAddr,
    class: LimitClass,
) -> Result<(), ApiError> {
    let ip = client_ip(headers, addr);
    state
        .limiter
        .admit(&ip, class)
        .map_err(|retry_after| ApiError::RateLimited { retry_after })
}

fn project_json(project: &Project) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "path": project.path,
        "status": project.status.as_str(),
        "error": project.status.error_message(),
        "created_at": project.created_at.to_rfc3339(),
        "last_indexed_at": project.last_indexed_at.map(|t| t.to_rfc3339()),
    })
}

// ============ GET /api/health ============

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "features": FEATURES,
        "cache": state.cache.stats(),
    }))
}

// ============ POST /api/projects ============

#[derive(Deserialize)]
struct CreateProjectRequest {
    path: String,
    name: Option<String>,
}

async fn handle_create_project(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::General)?;
    let project = state.registry.create_or_get(&req.path, req.name).await?;
    Ok(Json(project_json(&project)))
}

// ============ GET /api/projects ============

async fn handle_list_projects(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::General)?;
    let projects = state.registry.list().await?;
    let items: Vec<Value> = projects.iter().map(project_json).collect();
    Ok(Json(json!({ "projects": items })))
}

// ============ GET /api/projects/{id} ============

async fn handle_get_project(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::General)?;

    // Status is verified fresh; only the expensive stats query is cached.
    let project = state.registry.get(&id).await?;
    let key = format!("stats:{id}");
    let registry = state.registry.clone();
    let for_stats = project.clone();
    let stats = state
        .cache
        .get_or_compute(Some(&id), &key, TTL_STATS, || async move {
            let pool = registry.store_pool(&for_stats).await?;
            Ok(serde_json::to_value(store::stats(&pool).await?)?)
        })
        .await?;

    let mut body = project_json(&project);
    body["indexing_stats"] = stats;
    Ok(Json(body))
}

// ============ DELETE /api/projects/{id} ============

async fn handle_delete_project(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::General)?;
    state.registry.delete(&id).await?;
    state.cache.invalidate_scope(&id);
    Ok(Json(json!({ "success": true })))
}

// ============ POST /api/projects/index ============

#[derive(Deserialize)]
struct IndexRequest {
    project_id: String,
    /// `false` forces a full reindex. Defaults to incremental.
    #[serde(default = "default_incremental")]
    incremental: bool,
}

fn default_incremental() -> bool {
    true
}

async fn handle_index(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<IndexRequest>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::Indexing)?;
    state.indexer.start(&req.project_id, !req.incremental).await?;
    Ok(Json(json!({
        "status": "indexing",
        "project_id": req.project_id,
    })))
}

// ============ GET /api/projects/{id}/dependencies ============

#[derive(Deserialize)]
struct DependenciesQuery {
    #[serde(default)]
    include_transitive: bool,
}

async fn handle_dependencies(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<DependenciesQuery>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::General)?;
    let project = state.registry.get(&id).await?;

    let key = format!("deps:{id}:{}", params.include_transitive);
    let registry = state.registry.clone();
    let include_transitive = params.include_transitive;
    let body = state
        .cache
        .get_or_compute(Some(&id), &key, TTL_FILE, || async move {
            let pool = registry.store_pool(&project).await?;
            let mut deps = store::load_dependencies(&pool, include_transitive).await?;
            if deps.is_empty() {
                // Not warmed by an index run yet; extract on demand.
                let chunks = store::chunk_texts(&pool).await?;
                let extracted = deps::extract(std::path::Path::new(&project.path), &chunks)?;
                store::replace_dependencies(&pool, &extracted).await?;
                deps = store::load_dependencies(&pool, include_transitive).await?;
            }
            let stats = store::stats(&pool).await?;
            Ok(json!({
                "project_id": project.id,
                "include_transitive": include_transitive,
                "dependencies": deps::group_by_language(deps),
                "metadata": { "indexed_file_count": stats.file_count },
            }))
        })
        .await?;
    Ok(Json(body))
}

// ============ POST /api/query ============

#[derive(Deserialize)]
struct QueryRequest {
    project_id: String,
    query: String,
    top_k: Option<usize>,
}

async fn handle_query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::Query)?;

    // Validate before consulting the cache so misses and bad requests never
    // occupy an entry.
    state.registry.get(&req.project_id).await?;
    if req.query.trim().is_empty() {
        return Err(ApiError::validation("Query must not be empty"));
    }

    let top_k = req.top_k.unwrap_or(DEFAULT_TOP_K);
    let key = format!("search:{}:{}:{top_k}", req.project_id, req.query);
    let retrieval = state.retrieval.clone();
    let project_id = req.project_id.clone();
    let query = req.query.clone();

    let body = state
        .cache
        .get_or_compute(Some(&req.project_id), &key, TTL_SEARCH, || async move {
            let hits = retrieval.search(&project_id, &query, top_k).await?;
            Ok(json!({
                "project_id": project_id,
                "query": query,
                "count": hits.len(),
                "results": hits,
            }))
        })
        .await?;
    Ok(Json(body))
}

// ============ POST /code ============

#[derive(Deserialize)]
struct CodeRequest {
    prompt: String,
    project_id: Option<String>,
    context: Option<String>,
    use_rag: Option<bool>,
    top_k: Option<usize>,
}

async fn handle_code(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CodeRequest>,
) -> Result<Json<Value>, ApiError> {
    admit(&state, &headers, &addr, LimitClass::Query)?;

    let answer = state
        .retrieval
        .answer(
            req.project_id.as_deref(),
            &req.prompt,
            req.context.as_deref(),
            req.use_rag.unwrap_or(true),
            req.top_k.unwrap_or(DEFAULT_TOP_K),
        )
        .await?;
    Ok(Json(serde_json::to_value(answer).map_err(anyhow::Error::from)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let addr: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, &addr), "203.0.113.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_socket() {
        let addr: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), &addr), "10.0.0.9");
    }
}

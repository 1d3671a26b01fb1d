//! HTTP API tests over an ephemeral-port server with a real client.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use codescope::completion::CompletionProvider;
use codescope::config::Config;
use codescope::embedding::EmbeddingProvider;
use codescope::registry::Registry;
use codescope::server::{build_router, AppState};

#[derive(Default)]
struct MockEmbedder {
    calls: AtomicU32,
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 4];
                for (i, b) in t.bytes().enumerate() {
                    v[i % 4] += b as f32;
                }
                v
            })
            .collect())
    }

    fn dims(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

struct MockCompleter;

#[async_trait]
impl CompletionProvider for MockCompleter {
    async fn complete(&self, _system: Option<&str>, _prompt: &str) -> Result<String> {
        Ok("mock completion".to_string())
    }

    fn model_name(&self) -> &str {
        "mock-complete"
    }
}

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    embedder: Arc<MockEmbedder>,
    _storage: TempDir,
    project_dir: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn project_path(&self) -> String {
        self.project_dir.path().to_string_lossy().to_string()
    }
}

async fn spawn_server() -> TestServer {
    let storage = TempDir::new().unwrap();
    let project_dir = TempDir::new().unwrap();
    std::fs::write(
        project_dir.path().join("main.py"),
        "def greet(name):\n    return f'hello {name}'\n",
    )
    .unwrap();
    std::fs::write(
        project_dir.path().join("util.py"),
        "def add(a, b):\n    return a + b\n",
    )
    .unwrap();

    let config = Config::default();
    let registry = Arc::new(Registry::connect(storage.path()).await.unwrap());
    let embedder = Arc::new(MockEmbedder::default());
    let state = AppState::new(
        &config,
        registry,
        embedder.clone(),
        Arc::new(MockCompleter),
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        embedder,
        _storage: storage,
        project_dir,
    }
}

async fn create_project(server: &TestServer) -> String {
    let resp = server
        .client
        .post(server.url("/api/projects"))
        .json(&serde_json::json!({"path": server.project_path()}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Trigger indexing and poll the project until it leaves the indexing state.
async fn index_and_wait(server: &TestServer, project_id: &str) {
    let resp = server
        .client
        .post(server.url("/api/projects/index"))
        .json(&serde_json::json!({"project_id": project_id}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "indexing");
    assert_eq!(body["project_id"], project_id);

    wait_ready(server, project_id).await;
}

async fn wait_ready(server: &TestServer, project_id: &str) {
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let body: serde_json::Value = server
            .client
            .get(server.url(&format!("/api/projects/{project_id}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        match body["status"].as_str() {
            Some("ready") => return,
            Some("error") => panic!("index run failed: {:?}", body["error"]),
            _ => continue,
        }
    }
    panic!("index run did not finish in time");
}

#[tokio::test]
async fn test_health_reports_features() {
    let server = spawn_server().await;
    let body: serde_json::Value = server
        .client
        .get(server.url("/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    let features: Vec<&str> = body["features"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.as_str())
        .collect();
    assert!(features.contains(&"rag"));
    assert!(features.contains(&"incremental-indexing"));
    assert!(body["cache"]["hits"].is_u64());
}

#[tokio::test]
async fn test_create_project_is_idempotent() {
    let server = spawn_server().await;
    let first = create_project(&server).await;
    let second = create_project(&server).await;
    assert_eq!(first, second);

    let body: serde_json::Value = server
        .client
        .get(server.url("/api/projects"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["projects"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_create_project_rejects_bad_path() {
    let server = spawn_server().await;
    let resp = server
        .client
        .post(server.url("/api/projects"))
        .json(&serde_json::json!({"path": "/no/such/directory/anywhere"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("does not exist"));
}

#[tokio::test]
async fn test_index_then_query_flow() {
    let server = spawn_server().await;
    let project_id = create_project(&server).await;
    index_and_wait(&server, &project_id).await;

    let detail: serde_json::Value = server
        .client
        .get(server.url(&format!("/api/projects/{project_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail["indexing_stats"]["file_count"], 2);
    assert_eq!(detail["indexing_stats"]["is_indexed"], true);

    let resp = server
        .client
        .post(server.url("/api/query"))
        .json(&serde_json::json!({
            "project_id": project_id,
            "query": "greet someone by name",
            "top_k": 1,
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 1);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["path"].is_string());
    assert!(results[0]["score"].is_number());
    assert!(results[0]["content"].is_string());
}

#[tokio::test]
async fn test_query_rejects_empty_and_unknown() {
    let server = spawn_server().await;
    let project_id = create_project(&server).await;

    let resp = server
        .client
        .post(server.url("/api/query"))
        .json(&serde_json::json!({"project_id": project_id, "query": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = server
        .client
        .post(server.url("/api/query"))
        .json(&serde_json::json!({"project_id": "deadbeefdeadbeef", "query": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_code_endpoint_returns_completion() {
    let server = spawn_server().await;
    let project_id = create_project(&server).await;
    index_and_wait(&server, &project_id).await;

    let resp = server
        .client
        .post(server.url("/code"))
        .json(&serde_json::json!({
            "prompt": "how does greeting work",
            "project_id": project_id,
        }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "mock completion");
    assert!(!body["used_context"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_project_then_404() {
    let server = spawn_server().await;
    let project_id = create_project(&server).await;

    let resp = server
        .client
        .delete(server.url(&format!("/api/projects/{project_id}")))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let resp = server
        .client
        .get(server.url(&format!("/api/projects/{project_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = server
        .client
        .delete(server.url(&format!("/api/projects/{project_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_indexing_rate_limit_returns_429() {
    let server = spawn_server().await;

    // Same forwarded IP for every call; the project doesn't need to exist,
    // rate limiting is checked before lookup.
    for i in 0..10 {
        let resp = server
            .client
            .post(server.url("/api/projects/index"))
            .header("x-forwarded-for", "203.0.113.50")
            .json(&serde_json::json!({"project_id": "deadbeefdeadbeef"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404, "call {i} should pass the limiter");
    }

    let resp = server
        .client
        .post(server.url("/api/projects/index"))
        .header("x-forwarded-for", "203.0.113.50")
        .json(&serde_json::json!({"project_id": "deadbeefdeadbeef"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);

    let retry_header: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_header > 0 && retry_header <= 60);

    let body: serde_json::Value = resp.json().await.unwrap();
    let retry_after = body["retry_after"].as_u64().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    // A different client is unaffected.
    let resp = server
        .client
        .post(server.url("/api/projects/index"))
        .header("x-forwarded-for", "203.0.113.51")
        .json(&serde_json::json!({"project_id": "deadbeefdeadbeef"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_dependencies_endpoint_groups_by_language() {
    let server = spawn_server().await;
    std::fs::write(
        server.project_dir.path().join("requirements.txt"),
        "requests==2.31.0\n",
    )
    .unwrap();
    std::fs::write(
        server.project_dir.path().join("client.py"),
        "import requests\n\ndef fetch(url):\n    return requests.get(url)\n",
    )
    .unwrap();

    let project_id = create_project(&server).await;
    index_and_wait(&server, &project_id).await;

    let body: serde_json::Value = server
        .client
        .get(server.url(&format!("/api/projects/{project_id}/dependencies")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let python = body["dependencies"]["python"].as_array().unwrap();
    let requests = python
        .iter()
        .find(|d| d["name"] == "requests")
        .expect("requests dependency present");
    assert_eq!(requests["version"], "2.31.0");
    assert_eq!(requests["transitive"], false);
    assert_eq!(body["metadata"]["indexed_file_count"], 4);
}

#[tokio::test]
async fn test_index_incremental_flag_controls_run_mode() {
    let server = spawn_server().await;
    let project_id = create_project(&server).await;
    index_and_wait(&server, &project_id).await;

    let after_first = server.embedder.calls.load(Ordering::SeqCst);
    assert!(after_first > 0);

    // Default run is incremental; unchanged files embed nothing.
    index_and_wait(&server, &project_id).await;
    assert_eq!(server.embedder.calls.load(Ordering::SeqCst), after_first);

    // incremental = false forces a full re-embed of unchanged files.
    let resp = server
        .client
        .post(server.url("/api/projects/index"))
        .json(&serde_json::json!({"project_id": project_id, "incremental": false}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "indexing");

    wait_ready(&server, &project_id).await;
    assert!(server.embedder.calls.load(Ordering::SeqCst) > after_first);
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding the project registry database and one store
    /// database per project.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".codescope")
        .join("projects")
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Files larger than this (bytes) are skipped and counted separately.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Upper bound on chunk content length, in characters.
    #[serde(default = "default_chunk_max_chars")]
    pub chunk_max_chars: usize,
    /// Overlap between fixed-size fallback windows, in characters.
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    /// Number of chunk texts sent per embedding request.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Additional exclusion globs applied on top of the built-in ones.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            chunk_max_chars: default_chunk_max_chars(),
            chunk_overlap_chars: default_chunk_overlap_chars(),
            embed_batch_size: default_embed_batch_size(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_file_size() -> u64 {
    200_000
}
fn default_chunk_max_chars() -> usize {
    1600
}
fn default_chunk_overlap_chars() -> usize {
    200
}
fn default_embed_batch_size() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API (e.g. `https://api.openai.com/v1`).
    #[serde(default)]
    pub api_url: Option<String>,
    /// API key. The `CODESCOPE_API_KEY` environment variable takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub completion_model: Option<String>,
    /// Embedding vector dimensionality. Fixed by the model in use; changing
    /// the model requires a full reindex of every project.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            embedding_model: None,
            completion_model: None,
            dims: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl ProviderConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("CODESCOPE_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum number of cache entries before LRU eviction kicks in.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    512
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.indexing.chunk_max_chars == 0 {
        anyhow::bail!("indexing.chunk_max_chars must be > 0");
    }
    if config.indexing.chunk_overlap_chars >= config.indexing.chunk_max_chars {
        anyhow::bail!("indexing.chunk_overlap_chars must be smaller than chunk_max_chars");
    }
    if config.indexing.embed_batch_size == 0 {
        anyhow::bail!("indexing.embed_batch_size must be > 0");
    }
    if config.server.port == 0 {
        anyhow::bail!("server.port must be > 0");
    }
    if config.cache.capacity == 0 {
        anyhow::bail!("cache.capacity must be > 0");
    }
    if let Some(dims) = config.provider.dims {
        if dims == 0 {
            anyhow::bail!("provider.dims must be > 0 when set");
        }
    }
    // An embedding model without a URL is a config mistake we can catch
    // before the first failing provider call.
    if config.provider.embedding_model.is_some() && config.provider.api_url.is_none() {
        anyhow::bail!("provider.api_url must be set when provider.embedding_model is set");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("codescope.toml");
        std::fs::write(&path, content).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let (_tmp, path) = write_config("");
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.indexing.max_file_size, 200_000);
        assert_eq!(config.indexing.chunk_max_chars, 1600);
        assert_eq!(config.cache.capacity, 512);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let (_tmp, path) = write_config("[indexing]\nchunk_max_chars = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_overlap_ge_chunk_size() {
        let (_tmp, path) =
            write_config("[indexing]\nchunk_max_chars = 100\nchunk_overlap_chars = 100\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_model_without_url() {
        let (_tmp, path) = write_config("[provider]\nembedding_model = \"nomic-embed-text\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_full_provider_section() {
        let (_tmp, path) = write_config(
            r#"
[provider]
api_url = "http://localhost:11434/v1"
embedding_model = "nomic-embed-text"
completion_model = "qwen2.5-coder"
dims = 768
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.provider.dims, Some(768));
        assert_eq!(
            config.provider.api_url.as_deref(),
            Some("http://localhost:11434/v1")
        );
    }
}

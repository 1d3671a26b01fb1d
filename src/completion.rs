//! Completion provider for OpenAI-compatible chat endpoints.
//!
//! Shares the retry policy of the embedding client: 429/5xx/network errors
//! back off exponentially, other client errors fail fast.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::embedding::post_with_retry;

/// Trait for text completion backends.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a completion for `prompt`, with an optional system message.
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
}

/// Provider used when completions are not configured.
pub struct DisabledCompletionProvider;

#[async_trait]
impl CompletionProvider for DisabledCompletionProvider {
    async fn complete(&self, _system: Option<&str>, _prompt: &str) -> Result<String> {
        Err(anyhow!(
            "Completion provider is not configured (set provider.api_url and provider.completion_model)"
        ))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// Chat-completions client for any OpenAI-compatible `/chat/completions`
/// endpoint.
pub struct HttpCompletionProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_retries: u32,
}

impl HttpCompletionProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let base_url = config
            .api_url
            .clone()
            .ok_or_else(|| anyhow!("provider.api_url required for completions"))?;
        let model = config
            .completion_model
            .clone()
            .ok_or_else(|| anyhow!("provider.completion_model required"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, system: Option<&str>, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(serde_json::json!({"role": "system", "content": system}));
        }
        messages.push(serde_json::json!({"role": "user", "content": prompt}));

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let json = post_with_retry(
            &self.client,
            &url,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
        )
        .await?;
        parse_completion_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Extract `choices[0].message.content` from a chat response.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_response() {
        let json = serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "The answer."}}
            ]
        });
        assert_eq!(parse_completion_response(&json).unwrap(), "The answer.");
    }

    #[test]
    fn test_parse_rejects_empty_choices() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_completion_response(&json).is_err());
    }
}

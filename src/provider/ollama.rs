//! Ollama REST client: embeddings, generation and simplification.
//!
//! ureq is blocking, so every async trait method hands the request to tokio's
//! blocking pool. The engine's own deadline still applies on top of the
//! per-request ureq timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbeddingProvider, GenerationProvider, ProviderError, SimplificationProvider};

const SIMPLIFY_SYSTEM: &str = "You rewrite Indian legal text in plain language for a layperson. \
    Keep every citation such as \"Article 21\" or \"Section 124A\" exactly as written. \
    Reply with the rewritten text only.";

const GENERATE_SYSTEM: &str = "You are a legal assistant.";

/// Configuration for the Ollama client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    pub base_url: String,
    /// Model used for generation and simplification.
    pub model: String,
    /// Model used for embeddings.
    pub embed_model: String,
    /// Dimension of `embed_model` vectors.
    pub embedding_dimension: usize,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "llama3.2".into(),
            embed_model: "nomic-embed-text".into(),
            embedding_dimension: 768,
            timeout_secs: 120,
        }
    }
}

/// Client for the Ollama REST API.
#[derive(Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
}

impl OllamaClient {
    /// Create a new Ollama client with the given configuration.
    pub fn new(config: OllamaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
    }

    /// Probe the Ollama server via `/api/tags`.
    pub fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        matches!(agent.get(&url).call(), Ok(resp) if resp.status() == 200)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}{path}", self.config.base_url);

        let body_str = serde_json::to_string(body).map_err(|e| ProviderError::RequestFailed {
            message: format!("JSON serialize error: {e}"),
        })?;

        let resp = self
            .agent()
            .post(&url)
            .set("Content-Type", "application/json")
            .send_string(&body_str)
            .map_err(|e: ureq::Error| match e {
                ureq::Error::Transport(_) => ProviderError::Unavailable {
                    url: self.config.base_url.clone(),
                },
                other => ProviderError::RequestFailed {
                    message: other.to_string(),
                },
            })?;

        let resp_str = resp.into_string().map_err(|e| ProviderError::ParseError {
            message: e.to_string(),
        })?;

        serde_json::from_str(&resp_str).map_err(|e| ProviderError::ParseError {
            message: e.to_string(),
        })
    }

    /// Generate a completion from a prompt (blocking).
    pub fn generate_blocking(&self, prompt: &str, system: Option<&str>) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "stream": false,
        });
        if let Some(sys) = system {
            body["system"] = serde_json::Value::String(sys.to_string());
        }

        let json = self.post("/api/generate", &body)?;
        json["response"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ProviderError::ParseError {
                message: "missing 'response' field".into(),
            })
    }

    /// Embed text with the embedding model (blocking).
    pub fn embed_blocking(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.config.embed_model,
            "prompt": text,
        });

        let json = self.post("/api/embeddings", &body)?;
        let values = json["embedding"]
            .as_array()
            .ok_or_else(|| ProviderError::ParseError {
                message: "missing 'embedding' field".into(),
            })?;
        values
            .iter()
            .map(|v| {
                v.as_f64().map(|x| x as f32).ok_or_else(|| ProviderError::ParseError {
                    message: "non-numeric embedding component".into(),
                })
            })
            .collect()
    }

    async fn offload<T, F>(&self, call: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(OllamaClient) -> Result<T, ProviderError> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || call(client))
            .await
            .map_err(|e| ProviderError::RequestFailed {
                message: format!("blocking task failed: {e}"),
            })?
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaClient {
    fn model_version(&self) -> &str {
        &self.config.embed_model
    }

    fn dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let text = text.to_string();
        self.offload(move |c| c.embed_blocking(&text)).await
    }
}

#[async_trait]
impl GenerationProvider for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let prompt = prompt.to_string();
        self.offload(move |c| c.generate_blocking(&prompt, Some(GENERATE_SYSTEM)))
            .await
    }
}

#[async_trait]
impl SimplificationProvider for OllamaClient {
    async fn simplify(&self, text: &str) -> Result<String, ProviderError> {
        let text = text.to_string();
        self.offload(move |c| c.generate_blocking(&text, Some(SIMPLIFY_SYSTEM)))
            .await
    }
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("embed_model", &self.config.embed_model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> OllamaClient {
        OllamaClient::new(OllamaConfig {
            base_url: "http://127.0.0.1:1".into(), // unreachable port
            timeout_secs: 2,
            ..Default::default()
        })
    }

    #[test]
    fn probe_unreachable_returns_false() {
        assert!(!unreachable().probe());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let client = unreachable();
        let err = client.embed("test").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable { .. }));
        assert!(client.generate("test").await.is_err());
    }

    #[test]
    fn default_config_values() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2");
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.timeout_secs, 120);
    }
}

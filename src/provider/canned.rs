//! Fixed-response providers for tests, demos and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::graph::canonical_text;

use super::{EmbeddingProvider, GenerationProvider, ProviderError, SimplificationProvider};

/// Embedding provider backed by a lookup table keyed on canonical text.
///
/// Unknown text is a provider error, so tests notice every unexpected embed.
#[derive(Debug, Clone)]
pub struct TableEmbedder {
    model: String,
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl TableEmbedder {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
            table: HashMap::new(),
            failure: None,
            delay: None,
        }
    }

    /// Register the vector returned for `text`.
    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(canonical_text(text), vector);
        self
    }

    /// Fail every call with `message`.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(ProviderError::RequestFailed {
                message: message.clone(),
            });
        }
        self.table
            .get(&canonical_text(text))
            .cloned()
            .ok_or_else(|| ProviderError::ParseError {
                message: format!("no vector registered for {text:?}"),
            })
    }
}

/// Returns the same response to every prompt and counts the calls.
///
/// Doubles as a simplifier that answers every text with the canned response.
#[derive(Debug, Default)]
pub struct CannedGenerator {
    response: String,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Default::default()
        }
    }

    /// A generator whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(ProviderError::RequestFailed {
                message: message.clone(),
            }),
            None => Ok(self.response.clone()),
        }
    }
}

#[async_trait]
impl GenerationProvider for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        self.respond().await
    }
}

#[async_trait]
impl SimplificationProvider for CannedGenerator {
    async fn simplify(&self, _text: &str) -> Result<String, ProviderError> {
        self.respond().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn table_lookup_ignores_case_and_spacing() {
        let embedder = TableEmbedder::new("table-v1", 2).with("Police  search", vec![1.0, 0.0]);
        assert_eq!(embedder.embed("police search").await.unwrap(), vec![1.0, 0.0]);
        assert!(embedder.embed("drone").await.is_err());
    }

    #[tokio::test]
    async fn generator_counts_calls() {
        let generator = CannedGenerator::new("{}");
        generator.generate("a").await.unwrap();
        generator.generate("b").await.unwrap();
        assert_eq!(generator.calls(), 2);

        let failing = CannedGenerator::failing("down");
        assert!(failing.generate("a").await.is_err());
        assert_eq!(failing.calls(), 1);
    }
}

//! External collaborators: embedding, generation and simplification providers.
//!
//! The engine only sees the three traits below. Every call goes through
//! [`bounded`], so a slow provider turns into [`LexError::UpstreamTimeout`]
//! instead of a hung query. Provider error text is logged here and replaced by
//! an engine-authored reason before it reaches a [`LexError`].

pub mod canned;
pub mod hashing;
pub mod ollama;
pub mod simplify;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::error::{LexError, LexResult, UpstreamStage};
use crate::vector::EmbeddingSpace;

pub use canned::{CannedGenerator, TableEmbedder};
pub use hashing::HashingEmbedder;
pub use ollama::{OllamaClient, OllamaConfig};
pub use simplify::PlainSimplifier;

/// Errors raised by provider implementations. Never shown to end users.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("provider is not available at {url}")]
    #[diagnostic(
        code(lexgraph::provider::unavailable),
        help("Start the provider service or switch to the offline provider.")
    )]
    Unavailable { url: String },

    #[error("provider request failed: {message}")]
    #[diagnostic(
        code(lexgraph::provider::request_failed),
        help("Check that the provider is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse provider response: {message}")]
    #[diagnostic(
        code(lexgraph::provider::parse_error),
        help("The model returned an unexpected response format.")
    )]
    ParseError { message: String },
}

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the model that produced the vectors. Part of the index identity.
    fn model_version(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// The embedding space this provider produces vectors in.
    fn space(&self) -> EmbeddingSpace {
        EmbeddingSpace::new(self.model_version(), self.dimension())
    }
}

/// Produces structured graph content for an unmatched question.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Rewrites legal text in plain language.
#[async_trait]
pub trait SimplificationProvider: Send + Sync {
    async fn simplify(&self, text: &str) -> Result<String, ProviderError>;
}

/// Run one provider call under a deadline.
///
/// The outer result is the timeout; the inner one is the provider's own outcome.
pub(crate) async fn bounded<T, F>(
    stage: UpstreamStage,
    timeout: Duration,
    call: F,
) -> LexResult<Result<T, ProviderError>>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    tokio::time::timeout(timeout, call).await.map_err(|_| {
        tracing::warn!(%stage, timeout_ms = timeout.as_millis() as u64, "provider call timed out");
        LexError::UpstreamTimeout { stage, timeout }
    })
}

/// Embed `text` and validate the vector against the provider's declared space.
///
/// Empty text, provider failures, wrong dimensions and zero or non-finite
/// vectors all surface as [`LexError::EmbeddingUnavailable`].
pub(crate) async fn embed_text(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> LexResult<Vec<f32>> {
    if text.trim().is_empty() {
        return Err(LexError::EmbeddingUnavailable {
            reason: "empty text".into(),
        });
    }

    let vector = bounded(UpstreamStage::Embedding, timeout, provider.embed(text))
        .await?
        .map_err(|e| {
            tracing::warn!(error = %e, model = provider.model_version(), "embedding provider failed");
            LexError::EmbeddingUnavailable {
                reason: "embedding provider failed".into(),
            }
        })?;

    if vector.len() != provider.dimension() {
        tracing::warn!(
            expected = provider.dimension(),
            actual = vector.len(),
            "embedding provider returned wrong dimension"
        );
        return Err(LexError::EmbeddingUnavailable {
            reason: format!(
                "expected a {}-dimensional vector, got {}",
                provider.dimension(),
                vector.len()
            ),
        });
    }
    // The norm must itself be usable: tiny or huge components underflow or
    // overflow it even when every component is finite.
    let norm = crate::vector::norm(&vector);
    if vector.iter().any(|x| !x.is_finite()) || !norm.is_finite() || norm <= 0.0 {
        tracing::warn!(norm, "embedding provider returned a degenerate vector");
        return Err(LexError::EmbeddingUnavailable {
            reason: "embedding vector is degenerate".into(),
        });
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_reports_stage_on_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ProviderError>(1)
        };
        let err = bounded(UpstreamStage::Generation, Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LexError::UpstreamTimeout {
                stage: UpstreamStage::Generation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn embed_text_rejects_empty_and_bad_vectors() {
        let embedder = TableEmbedder::new("table-v1", 2)
            .with("zero", vec![0.0, 0.0])
            .with("short", vec![1.0])
            .with("nan", vec![f32::NAN, 1.0])
            .with("tiny", vec![1e-30, 0.0])
            .with("huge", vec![3e38, 3e38])
            .with("ok", vec![1.0, 0.0]);
        let t = Duration::from_secs(1);

        for text in ["", "   ", "zero", "short", "nan", "tiny", "huge", "unknown"] {
            let err = embed_text(&embedder, text, t).await.unwrap_err();
            assert_eq!(err.code(), "EMBEDDING_UNAVAILABLE", "{text}");
        }
        assert_eq!(embed_text(&embedder, "ok", t).await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn provider_error_text_is_not_leaked() {
        let embedder = TableEmbedder::new("table-v1", 2).failing("secret upstream detail");
        let err = embed_text(&embedder, "anything", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("secret"));
    }
}

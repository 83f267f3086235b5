//! Semantic matcher: question text to ranked scenario candidates.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{ConfigError, LexResult};
use crate::graph::NodeId;
use crate::knowledge::KnowledgeBase;
use crate::provider::{EmbeddingProvider, embed_text};

/// A scenario close to the question, with its cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub scenario_id: NodeId,
    pub score: f32,
}

/// Inclusive acceptance threshold on the raw cosine scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub const DEFAULT: Threshold = Threshold(0.75);
    /// Stricter bar for reusing a drafted principle: paraphrases of a
    /// principle often carry a different legal meaning.
    pub const PRINCIPLE_REUSE: Threshold = Threshold(0.92);

    /// Thresholds outside [-1, 1] would accept everything or nothing.
    pub fn new(value: f32) -> Result<Self, ConfigError> {
        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return Err(ConfigError::Invalid {
                message: format!("threshold must lie in [-1, 1], got {value}"),
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }

    /// `score >= threshold`.
    pub fn accepts(self, score: f32) -> bool {
        score >= self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Embeds questions and ranks the indexed scenarios against them.
pub struct SemanticMatcher {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: usize,
    threshold: Threshold,
}

impl SemanticMatcher {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        embedder: Arc<dyn EmbeddingProvider>,
        top_k: usize,
        threshold: Threshold,
    ) -> Self {
        Self {
            kb,
            embedder,
            top_k,
            threshold,
        }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Top-K scenarios for `query`, best first, ties by ascending id.
    pub async fn match_query(&self, query: &str, timeout: Duration) -> LexResult<Vec<MatchCandidate>> {
        let vector = embed_text(self.embedder.as_ref(), query, timeout).await?;
        let candidates = self.search_vector(&vector, self.top_k)?;

        if let Some(best) = candidates.first() {
            tracing::debug!(
                scenario = %best.scenario_id,
                score = best.score,
                threshold = self.threshold.value(),
                candidates = candidates.len(),
                "matched query"
            );
        } else {
            tracing::debug!("no scenarios indexed");
        }
        Ok(candidates)
    }

    /// Rank scenarios against an already computed vector.
    pub fn search_vector(&self, vector: &[f32], k: usize) -> LexResult<Vec<MatchCandidate>> {
        let state = self.kb.read()?;
        let hits = state.index.search(vector, k)?;
        Ok(hits
            .into_iter()
            .map(|h| MatchCandidate {
                scenario_id: h.id,
                score: h.score,
            })
            .collect())
    }

    /// The top candidate, if it clears the threshold.
    pub fn accept<'a>(&self, candidates: &'a [MatchCandidate]) -> Option<&'a MatchCandidate> {
        candidates
            .first()
            .filter(|c| self.threshold.accepts(c.score))
    }
}

impl std::fmt::Debug for SemanticMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMatcher")
            .field("model", &self.embedder.model_version())
            .field("top_k", &self.top_k)
            .field("threshold", &self.threshold)
            .finish()
    }
}

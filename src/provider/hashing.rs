//! Offline bag-of-words embedder.
//!
//! Each token maps to a deterministic pseudo-random vector seeded by a stable
//! hash of the token; a text's embedding is the sum of its tokens' vectors.
//! Texts sharing many tokens therefore point in similar directions. The
//! output depends only on the text and the dimension, so vectors persisted by
//! one run remain valid in the next.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{EmbeddingProvider, ProviderError};

/// Model identifier recorded in the embedding space.
pub const HASHING_MODEL: &str = "hashing-bow-v2";

/// Function words carrying no legal meaning.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "for", "from", "has", "have",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "the", "to", "was", "what", "with",
];

/// Deterministic token-hash embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embed synchronously.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
            .collect();
        if tokens.is_empty() {
            // Only stopwords or punctuation: fall back to the trimmed text itself.
            tokens.push(lowered.trim());
        }

        let mut out = vec![0.0f32; self.dimension];
        for token in tokens {
            // BLAKE3 is stable across builds and platforms, unlike `DefaultHasher`.
            let mut rng = StdRng::from_seed(*blake3::hash(token.as_bytes()).as_bytes());
            for slot in out.iter_mut() {
                *slot += rng.gen_range(-1.0f32..1.0);
            }
        }
        out
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_version(&self) -> &str {
        HASHING_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::ParseError {
                message: "cannot embed empty text".into(),
            });
        }
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{cosine, norm};

    fn sim(e: &HashingEmbedder, a: &str, b: &str) -> f32 {
        let va = e.embed_sync(a);
        let vb = e.embed_sync(b);
        cosine(&va, norm(&va), &vb, norm(&vb))
    }

    #[test]
    fn deterministic() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed_sync("police search"), e.embed_sync("police search"));
        assert_eq!(e.embed_sync("Police  SEARCH"), e.embed_sync("police search"));
    }

    #[test]
    fn shared_tokens_raise_similarity() {
        let e = HashingEmbedder::new(256);
        let close = sim(
            &e,
            "police searched my house without a warrant",
            "police search of house without warrant",
        );
        let far = sim(
            &e,
            "police searched my house without a warrant",
            "drone flying over neighbour's garden",
        );
        assert!(close > far, "close={close} far={far}");
        assert!(close > 0.5);
    }

    #[test]
    fn stopword_only_text_still_embeds() {
        let e = HashingEmbedder::new(32);
        assert!(norm(&e.embed_sync("the of")) > 0.0);
    }

    #[test]
    fn token_order_does_not_matter() {
        let e = HashingEmbedder::new(64);
        assert_eq!(e.embed_sync("warrant search"), e.embed_sync("search warrant"));
        assert_ne!(e.embed_sync("warrant"), e.embed_sync("search"));
    }
}

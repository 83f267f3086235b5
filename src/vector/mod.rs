//! Scenario vectors and cosine nearest-neighbour search.
//!
//! Similarity is raw cosine on a [-1, 1] scale: 1.0 identical direction,
//! 0.0 orthogonal, -1.0 opposite. Match thresholds are expressed on this scale.

pub mod index;

use serde::{Deserialize, Serialize};

/// Identity of the vectors held by an index: which model produced them and
/// their dimension. Vectors from two different spaces are never mixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub model: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            model: model.into(),
            dimension,
        }
    }
}

impl std::fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}d", self.model, self.dimension)
    }
}

/// Cosine similarity of two equal-length vectors given their norms.
pub(crate) fn cosine(a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

/// Euclidean norm.
pub(crate) fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_pythagorean_vectors_is_exact() {
        let q = [3.0f32, 2.0, 1.0, 1.0, 1.0];
        let s = [1.0f32, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(norm(&q), 4.0);
        assert_eq!(cosine(&q, norm(&q), &s, norm(&s)), 0.75);
    }

    #[test]
    fn space_display() {
        assert_eq!(EmbeddingSpace::new("hashing-v1", 64).to_string(), "hashing-v1/64d");
    }
}

//! Vector index: scenario-id-to-vector mapping with cosine k-NN search.
//!
//! The index keeps:
//! - An exact `NodeId → vector` map (ordered, so iteration and persistence are deterministic)
//! - An HNSW graph for approximate candidate retrieval on large indexes
//!
//! Up to `exact_limit` vectors every query is scored exhaustively (rayon-parallel).
//! Beyond that, HNSW proposes candidates which are then re-scored exactly, so
//! every reported score is a true cosine value and ties resolve by ascending id.

use std::collections::{BTreeMap, HashMap};

use anndists::dist::DistCosine;
use hnsw_rs::hnsw::Hnsw;
use rayon::prelude::*;

use crate::error::VectorError;
use crate::graph::NodeId;

use super::{EmbeddingSpace, cosine, norm};

/// Result type for vector index operations.
pub type VectorResult<T> = std::result::Result<T, VectorError>;

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// The matching scenario node.
    pub id: NodeId,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

#[derive(Debug, Clone)]
struct Entry {
    values: Vec<f32>,
    norm: f32,
    slot: usize,
}

/// One vector per scenario node, searchable by cosine similarity.
pub struct VectorIndex {
    space: EmbeddingSpace,
    /// Exact id → vector mapping.
    vectors: BTreeMap<NodeId, Entry>,
    /// HNSW ANN index over the same vectors.
    hnsw: Hnsw<'static, f32, DistCosine>,
    /// HNSW slot → node id. Removed entries leave their slot unmapped.
    slots: HashMap<usize, NodeId>,
    next_slot: usize,
    exact_limit: usize,
}

// Safety: Hnsw synchronizes its own layers internally; every mutation of the
// surrounding maps goes through `&mut self`, and the knowledge base wraps the
// whole index in a RwLock.
unsafe impl Send for VectorIndex {}
unsafe impl Sync for VectorIndex {}

impl VectorIndex {
    /// Create an empty index for the given embedding space.
    ///
    /// `capacity` is a sizing hint for the HNSW graph; `exact_limit` is the
    /// largest size still searched exhaustively.
    pub fn new(space: EmbeddingSpace, capacity: usize, exact_limit: usize) -> Self {
        // HNSW parameters:
        // max_nb_connection: 16 (standard for sentence-embedding dimensions)
        // ef_construction: 200 (higher = better recall during build)
        // max_layer: from expected elements, capped at the library maximum of 16
        let capacity = capacity.max(16);
        let max_layer = ((capacity as f64).log2().ceil() as usize).clamp(4, 16);
        let hnsw = Hnsw::new(16, capacity, max_layer, 200, DistCosine {});

        Self {
            space,
            vectors: BTreeMap::new(),
            hnsw,
            slots: HashMap::new(),
            next_slot: 0,
            exact_limit,
        }
    }

    /// The embedding space every stored vector belongs to.
    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    /// Validate a vector against this index, returning its norm.
    pub fn validate(&self, id: &NodeId, values: &[f32]) -> VectorResult<f32> {
        if values.len() != self.space.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.space.dimension,
                actual: values.len(),
            });
        }
        let n = norm(values);
        if !n.is_finite() || n == 0.0 {
            return Err(VectorError::Degenerate { id: id.to_string() });
        }
        Ok(n)
    }

    /// Insert the vector of a scenario node.
    pub fn insert(&mut self, id: NodeId, values: Vec<f32>) -> VectorResult<()> {
        if self.vectors.contains_key(&id) {
            return Err(VectorError::Duplicate { id: id.to_string() });
        }
        let n = self.validate(&id, &values)?;

        let slot = self.next_slot;
        self.next_slot += 1;
        self.hnsw.insert((&values, slot));
        self.slots.insert(slot, id.clone());
        self.vectors.insert(
            id,
            Entry {
                values,
                norm: n,
                slot,
            },
        );
        Ok(())
    }

    /// Remove a vector. Only used to undo an aborted commit.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        match self.vectors.remove(id) {
            Some(entry) => {
                self.slots.remove(&entry.slot);
                true
            }
            None => false,
        }
    }

    /// Get the stored vector of a node.
    pub fn get(&self, id: &NodeId) -> Option<&[f32]> {
        self.vectors.get(id).map(|e| e.values.as_slice())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.vectors.contains_key(id)
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// All (id, vector) pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &[f32])> {
        self.vectors.iter().map(|(id, e)| (id, e.values.as_slice()))
    }

    /// Search for the `k` most similar vectors to `query`.
    ///
    /// Returns hits sorted by descending score, ties broken by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> VectorResult<Vec<SearchHit>> {
        if query.len() != self.space.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.space.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.vectors.is_empty() {
            return Ok(vec![]);
        }
        let qn = norm(query);
        if !qn.is_finite() || qn == 0.0 {
            return Err(VectorError::Degenerate {
                id: "<query>".into(),
            });
        }

        let mut hits: Vec<SearchHit> = if self.vectors.len() <= self.exact_limit {
            self.vectors
                .par_iter()
                .map(|(id, e)| SearchHit {
                    id: id.clone(),
                    score: cosine(query, qn, &e.values, e.norm),
                })
                .collect()
        } else {
            let wanted = (k * 4).max(k);
            let ef_search = (wanted * 2).max(64);
            self.hnsw
                .search(query, wanted, ef_search)
                .into_iter()
                .filter_map(|n| {
                    let id = self.slots.get(&n.d_id)?;
                    let e = self.vectors.get(id)?;
                    Some(SearchHit {
                        id: id.clone(),
                        score: cosine(query, qn, &e.values, e.norm),
                    })
                })
                .collect()
        };

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.dedup_by(|a, b| a.id == b.id);
        hits.truncate(k);
        Ok(hits)
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("space", &self.space)
            .field("len", &self.vectors.len())
            .field("exact_limit", &self.exact_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn index(dim: usize) -> VectorIndex {
        VectorIndex::new(EmbeddingSpace::new("test", dim), 100, 10_000)
    }

    #[test]
    fn search_finds_self_first() {
        let mut idx = index(3);
        idx.insert(id("S1"), vec![1.0, 0.0, 0.0]).unwrap();
        idx.insert(id("S2"), vec![0.0, 1.0, 0.0]).unwrap();
        idx.insert(id("S3"), vec![1.0, 1.0, 0.0]).unwrap();

        let hits = idx.search(&[0.0, 2.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].id, id("S2"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let mut idx = index(2);
        idx.insert(id("b"), vec![1.0, 0.0]).unwrap();
        idx.insert(id("a"), vec![2.0, 0.0]).unwrap();
        idx.insert(id("c"), vec![0.0, 1.0]).unwrap();

        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].id, id("a"));
        assert_eq!(hits[1].id, id("b"));
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn rejects_wrong_dimension_and_zero_vectors() {
        let mut idx = index(3);
        assert!(matches!(
            idx.insert(id("S1"), vec![1.0, 0.0]),
            Err(VectorError::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(
            idx.insert(id("S1"), vec![0.0, 0.0, 0.0]),
            Err(VectorError::Degenerate { .. })
        ));
        assert!(matches!(
            idx.insert(id("S1"), vec![f32::NAN, 0.0, 1.0]),
            Err(VectorError::Degenerate { .. })
        ));
        assert!(idx.is_empty());
        assert!(idx.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn one_vector_per_id() {
        let mut idx = index(2);
        idx.insert(id("S1"), vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            idx.insert(id("S1"), vec![0.0, 1.0]),
            Err(VectorError::Duplicate { .. })
        ));
    }

    #[test]
    fn removed_vectors_are_never_returned() {
        let mut idx = VectorIndex::new(EmbeddingSpace::new("test", 2), 100, 0);
        idx.insert(id("S1"), vec![1.0, 0.0]).unwrap();
        idx.insert(id("S2"), vec![0.9, 0.1]).unwrap();
        assert!(idx.remove(&id("S1")));
        assert!(!idx.remove(&id("S1")));

        // exact_limit = 0 forces the HNSW path.
        let hits = idx.search(&[1.0, 0.0], 2).unwrap();
        assert!(hits.iter().all(|h| h.id != id("S1")));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn hnsw_path_rescored_exactly() {
        let mut idx = VectorIndex::new(EmbeddingSpace::new("test", 4), 100, 0);
        for i in 0..40u32 {
            let angle = i as f32 * 0.05;
            idx.insert(
                id(&format!("S{i:02}")),
                vec![angle.cos(), angle.sin(), 0.0, 0.0],
            )
            .unwrap();
        }
        let hits = idx.search(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].id, id("S00"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}

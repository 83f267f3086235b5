//! Durable persistence for the knowledge base.
//!
//! The in-memory graph and vector index are authoritative while the process
//! runs; [`GraphStore`] mirrors every commit batch into redb and reproduces the
//! exact same state on the next start.

pub mod durable;

use crate::error::StoreError;
use crate::graph::{Edge, Node, NodeId};
use crate::vector::EmbeddingSpace;

pub use durable::GraphStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Everything read back from disk, in replay order.
#[derive(Debug, Clone, Default)]
pub struct PersistedGraph {
    /// Nodes in insertion order.
    pub nodes: Vec<Node>,
    /// Edges with their ranks, in rank order.
    pub edges: Vec<(u64, Edge)>,
    /// Scenario vectors in id order.
    pub vectors: Vec<(NodeId, Vec<f32>)>,
    /// Space the vectors were produced in; `None` for a fresh store.
    pub space: Option<EmbeddingSpace>,
    /// Next value of the auto-linker id allocator.
    pub allocator_next: u64,
}

impl PersistedGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

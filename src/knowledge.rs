//! The knowledge base: graph and vector index updated in lock-step.
//!
//! Both structures live behind one readers/writer lock. Matching and traversal
//! take read guards; a [`CommitBatch`] is applied under the write guard in one
//! synchronous step:
//!
//! 1. graph savepoint
//! 2. insert nodes and edges
//! 3. insert scenario vectors
//! 4. one durable redb transaction (when persistent)
//!
//! A failure at any step rolls the graph back to the savepoint and removes the
//! vectors inserted so far, so readers only ever see the state before or after
//! a whole batch. A separate async commit lock serializes the auto-linker from
//! its duplicate check through its commit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use crate::error::{LexError, LexResult, VectorError};
use crate::graph::index::KnowledgeGraph;
use crate::graph::{Edge, Node, NodeId, NodeKind};
use crate::store::GraphStore;
use crate::vector::EmbeddingSpace;
use crate::vector::index::VectorIndex;

/// Sizing of the vector index.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    /// Expected number of scenarios (HNSW capacity hint).
    pub capacity: usize,
    /// Largest index still searched exhaustively.
    pub exact_search_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            exact_search_limit: 10_000,
        }
    }
}

/// Graph and index, always mutated together.
#[derive(Debug)]
pub struct KnowledgeState {
    pub graph: KnowledgeGraph,
    pub index: VectorIndex,
}

impl KnowledgeState {
    fn new(space: EmbeddingSpace, config: IndexConfig) -> Self {
        Self {
            graph: KnowledgeGraph::new(),
            index: VectorIndex::new(space, config.capacity, config.exact_search_limit),
        }
    }

    /// Verify that every scenario has exactly one vector and every vector
    /// belongs to a scenario.
    pub fn check(&self) -> LexResult<ConsistencyReport> {
        let scenarios = self.graph.ids_of_kind(NodeKind::Scenario);
        for id in &scenarios {
            if !self.index.contains(id) {
                return Err(LexError::inconsistency(format!("scenario {id} has no vector")));
            }
        }
        for (id, _) in self.index.iter() {
            match self.graph.node(id) {
                Some(node) if node.kind == NodeKind::Scenario => {}
                Some(node) => {
                    return Err(LexError::inconsistency(format!(
                        "vector {id} belongs to a {} node",
                        node.kind
                    )));
                }
                None => {
                    return Err(LexError::inconsistency(format!(
                        "vector {id} has no graph node"
                    )));
                }
            }
        }
        Ok(ConsistencyReport {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            scenarios: scenarios.len(),
            vectors: self.index.len(),
        })
    }
}

/// Sizes observed by a successful consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ConsistencyReport {
    pub nodes: usize,
    pub edges: usize,
    pub scenarios: usize,
    pub vectors: usize,
}

/// New graph content applied as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// One vector per new scenario node.
    pub vectors: Vec<(NodeId, Vec<f32>)>,
    /// Allocator position to persist with the batch.
    pub allocator_next: Option<u64>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Whether the batch already carries a node with this id.
    pub fn has_node(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    /// Lock-step rule: vectors exactly for the batch's new scenarios.
    fn validate(&self) -> LexResult<()> {
        for node in self.nodes.iter().filter(|n| n.kind == NodeKind::Scenario) {
            if !self.vectors.iter().any(|(id, _)| id == &node.id) {
                return Err(LexError::inconsistency(format!(
                    "scenario {} committed without a vector",
                    node.id
                )));
            }
        }
        for (id, _) in &self.vectors {
            let is_new_scenario = self
                .nodes
                .iter()
                .any(|n| &n.id == id && n.kind == NodeKind::Scenario);
            if !is_new_scenario {
                return Err(LexError::inconsistency(format!(
                    "vector {id} does not belong to a new scenario"
                )));
            }
        }
        Ok(())
    }
}

/// What a commit actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub nodes: usize,
    /// Edges inserted; duplicates of existing edges are not counted.
    pub edges: usize,
    pub vectors: usize,
}

/// Hands out ids for auto-generated nodes.
///
/// Produces monotonically increasing sequence numbers; ids already present in
/// the graph are skipped. Only used under the commit lock.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Create an allocator that resumes from a persisted position.
    pub fn starting_from(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Allocate a fresh id for `kind`, unused by the graph and by `pending`.
    pub fn allocate(&self, kind: NodeKind, graph: &KnowledgeGraph, pending: &CommitBatch) -> NodeId {
        loop {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            let id = NodeId::generated(kind, n);
            if !graph.contains(&id) && !pending.has_node(&id) {
                return id;
            }
        }
    }

    /// The next sequence number that would be tried.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailPoint {
    /// After graph insertion, before any vector is inserted.
    BeforeVectors,
    /// After vector insertion, before the durable write.
    BeforeDurable,
}

/// Owner of the knowledge state, its durable mirror and the commit lock.
pub struct KnowledgeBase {
    state: RwLock<KnowledgeState>,
    store: Option<GraphStore>,
    commit_lock: tokio::sync::Mutex<()>,
    allocator: IdAllocator,
    #[cfg(test)]
    failpoint: std::sync::Mutex<Option<FailPoint>>,
}

impl KnowledgeBase {
    /// An empty, memory-only knowledge base.
    pub fn in_memory(space: EmbeddingSpace, config: IndexConfig) -> Self {
        Self::from_parts(KnowledgeState::new(space, config), None, IdAllocator::default())
    }

    /// Open a persistent knowledge base, replaying everything stored on disk.
    ///
    /// The stored embedding space must equal `space`; vectors from another
    /// model are not comparable with fresh query embeddings.
    pub fn open(store: GraphStore, space: EmbeddingSpace, config: IndexConfig) -> LexResult<Self> {
        let persisted = store.load()?;

        match &persisted.space {
            Some(stored) if stored != &space => {
                return Err(VectorError::SpaceMismatch {
                    stored: stored.to_string(),
                    provider: space.to_string(),
                }
                .into());
            }
            Some(_) => {}
            None if !persisted.is_empty() => {
                return Err(LexError::inconsistency(
                    "stored graph has no recorded embedding space",
                ));
            }
            None => store.set_space(&space)?,
        }

        let mut state = KnowledgeState::new(space, config);
        for node in persisted.nodes {
            state.graph.insert_node(node)?;
        }
        for (rank, edge) in &persisted.edges {
            state.graph.insert_ranked(edge, *rank)?;
        }
        for (id, values) in persisted.vectors {
            state.index.insert(id, values)?;
        }
        let report = state.check()?;

        tracing::info!(
            path = %store.path().display(),
            nodes = report.nodes,
            edges = report.edges,
            vectors = report.vectors,
            "loaded knowledge base"
        );

        Ok(Self::from_parts(
            state,
            Some(store),
            IdAllocator::starting_from(persisted.allocator_next),
        ))
    }

    fn from_parts(state: KnowledgeState, store: Option<GraphStore>, allocator: IdAllocator) -> Self {
        Self {
            state: RwLock::new(state),
            store,
            commit_lock: tokio::sync::Mutex::new(()),
            allocator,
            #[cfg(test)]
            failpoint: std::sync::Mutex::new(None),
        }
    }

    /// Shared read access. Never hold the guard across an await point.
    pub fn read(&self) -> LexResult<RwLockReadGuard<'_, KnowledgeState>> {
        self.state
            .read()
            .map_err(|_| LexError::inconsistency("knowledge state lock poisoned by an aborted commit"))
    }

    /// Serialize writers from their duplicate check through their commit.
    pub async fn lock_commits(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.commit_lock.lock().await
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Verify the lock-step invariant between graph and index.
    pub fn check_consistency(&self) -> LexResult<ConsistencyReport> {
        self.read()?.check()
    }

    #[cfg(test)]
    pub(crate) fn fail_at(&self, point: Option<FailPoint>) {
        if let Ok(mut slot) = self.failpoint.lock() {
            *slot = point;
        }
    }

    #[cfg(test)]
    fn trip(&self, point: FailPoint) -> LexResult<()> {
        match self.failpoint.lock() {
            Ok(slot) if *slot == Some(point) => {
                Err(LexError::inconsistency(format!("injected failure at {point:?}")))
            }
            _ => Ok(()),
        }
    }

    /// Apply a batch atomically: all of it becomes visible, or none of it.
    pub fn commit(&self, batch: CommitBatch) -> LexResult<CommitReport> {
        batch.validate()?;

        let mut state = self
            .state
            .write()
            .map_err(|_| LexError::inconsistency("knowledge state lock poisoned by an aborted commit"))?;
        let savepoint = state.graph.savepoint();
        let mut indexed: Vec<NodeId> = Vec::new();

        let result = self.apply(&mut state, &batch, &mut indexed);
        match result {
            Ok(report) => {
                tracing::info!(
                    nodes = report.nodes,
                    edges = report.edges,
                    vectors = report.vectors,
                    "committed batch"
                );
                Ok(report)
            }
            Err(err) => {
                state.graph.rollback(savepoint);
                for id in &indexed {
                    state.index.remove(id);
                }
                tracing::warn!(error = %err, "commit rolled back");
                Err(err)
            }
        }
    }

    fn apply(
        &self,
        state: &mut KnowledgeState,
        batch: &CommitBatch,
        indexed: &mut Vec<NodeId>,
    ) -> LexResult<CommitReport> {
        for node in &batch.nodes {
            state.graph.insert_node(node.clone())?;
        }
        let mut edges: Vec<(u64, Edge)> = Vec::new();
        for edge in &batch.edges {
            if let Some(rank) = state.graph.insert_edge(edge)? {
                edges.push((rank, edge.clone()));
            }
        }

        #[cfg(test)]
        self.trip(FailPoint::BeforeVectors)?;

        for (id, values) in &batch.vectors {
            state.index.insert(id.clone(), values.clone())?;
            indexed.push(id.clone());
        }

        #[cfg(test)]
        self.trip(FailPoint::BeforeDurable)?;

        if let Some(store) = &self.store {
            store.write_batch(&batch.nodes, &edges, &batch.vectors, batch.allocator_next)?;
        }

        Ok(CommitReport {
            nodes: batch.nodes.len(),
            edges: edges.len(),
            vectors: batch.vectors.len(),
        })
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("persistent", &self.store.is_some())
            .field("allocator_next", &self.allocator.peek_next())
            .finish()
    }
}

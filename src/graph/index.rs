//! In-memory knowledge graph store.
//!
//! Uses `petgraph` for the graph structure with side indexes for O(1) lookups
//! by node id, edge deduplication, and exact-text duplicate detection.
//!
//! The store is append-only apart from [`KnowledgeGraph::rollback`], which
//! removes everything inserted after a [`Savepoint`]. Because petgraph indices
//! stay dense as long as removals happen strictly in reverse insertion order,
//! rollback never disturbs nodes or edges that predate the savepoint.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::citation;
use crate::error::GraphError;

use super::{Edge, EdgeData, EdgeKind, META_NUMBER, Node, NodeId, NodeKind};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Marker of the graph size at a point in time; see [`KnowledgeGraph::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint {
    nodes: usize,
    edges: usize,
    next_rank: u64,
}

/// In-memory knowledge graph backed by petgraph.
///
/// Not internally synchronized: the [`KnowledgeBase`](crate::knowledge::KnowledgeBase)
/// owns it behind a readers/writer lock together with the vector index.
#[derive(Debug, Default)]
pub struct KnowledgeGraph {
    /// The directed graph: nodes carry the full record, edges carry kind + rank.
    graph: DiGraph<Node, EdgeData>,
    /// NodeId → NodeIndex mapping.
    node_index: HashMap<NodeId, NodeIndex>,
    /// (source, target, kind) of every stored edge.
    edge_keys: HashSet<(NodeIndex, NodeIndex, EdgeKind)>,
    /// (kind, canonical text) → first node carrying that text.
    texts: HashMap<(NodeKind, String), NodeId>,
    /// Rank given to the next inserted edge.
    next_rank: u64,
}

impl KnowledgeGraph {
    /// Create a new empty knowledge graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Ids are unique across all node kinds.
    pub fn insert_node(&mut self, node: Node) -> GraphResult<()> {
        if node.text.trim().is_empty() {
            return Err(GraphError::EmptyText {
                id: node.id.to_string(),
            });
        }
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::IdCollision {
                id: node.id.to_string(),
            });
        }

        let key = (node.kind, node.canonical_text());
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.node_index.insert(id.clone(), idx);
        self.texts.entry(key).or_insert(id);
        Ok(())
    }

    /// Insert an edge, returning its rank, or `None` if an identical edge exists.
    pub fn insert_edge(&mut self, edge: &Edge) -> GraphResult<Option<u64>> {
        let rank = self.next_rank;
        let inserted = self.insert_ranked(edge, rank)?;
        Ok(inserted.then_some(rank))
    }

    /// Insert an edge with a known rank (used when replaying persisted state).
    ///
    /// Ranks must be replayed in increasing order.
    pub(crate) fn insert_ranked(&mut self, edge: &Edge, rank: u64) -> GraphResult<bool> {
        let dangling = || GraphError::DanglingEdge {
            kind: edge.kind.to_string(),
            source_id: edge.source.to_string(),
            target_id: edge.target.to_string(),
        };
        let src = *self.node_index.get(&edge.source).ok_or_else(dangling)?;
        let dst = *self.node_index.get(&edge.target).ok_or_else(dangling)?;

        let src_kind = self.graph[src].kind;
        let dst_kind = self.graph[dst].kind;
        if !edge.kind.permits(src_kind, dst_kind) {
            return Err(GraphError::IllegalEdge {
                kind: edge.kind.to_string(),
                source_kind: src_kind.to_string(),
                target_kind: dst_kind.to_string(),
            });
        }

        if !self.edge_keys.insert((src, dst, edge.kind)) {
            return Ok(false);
        }
        self.graph.add_edge(
            src,
            dst,
            EdgeData {
                kind: edge.kind,
                rank,
            },
        );
        self.next_rank = self.next_rank.max(rank + 1);
        Ok(true)
    }

    /// Get a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.node_index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Check if a node exists.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_index.contains_key(id)
    }

    /// Whether an edge of `kind` joins `source` to `target`.
    pub fn has_edge(&self, source: &NodeId, target: &NodeId, kind: EdgeKind) -> bool {
        match (self.node_index.get(source), self.node_index.get(target)) {
            (Some(&s), Some(&t)) => self.edge_keys.contains(&(s, t, kind)),
            _ => false,
        }
    }

    /// Targets of outgoing `kind` edges from `id`, with the rank of each edge,
    /// ordered by (rank, id).
    pub fn outgoing(&self, id: &NodeId, kind: EdgeKind) -> Vec<(u64, &Node)> {
        let Some(&idx) = self.node_index.get(id) else {
            return vec![];
        };
        let mut out: Vec<(u64, &Node)> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|e| e.weight().kind == kind)
            .map(|e| (e.weight().rank, &self.graph[e.target()]))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        out
    }

    /// The node of `kind` whose canonical text equals that of `text`.
    pub fn find_by_text(&self, kind: NodeKind, text: &str) -> Option<&NodeId> {
        self.texts.get(&(kind, super::canonical_text(text)))
    }

    /// The article whose number (metadata, citation, or text) equals `number`.
    pub fn find_article_by_number(&self, number: &str) -> Option<&NodeId> {
        let wanted = number.trim().to_uppercase();
        self.graph
            .node_weights()
            .filter(|n| n.kind == NodeKind::Article)
            .find(|n| {
                let stored = n
                    .metadata
                    .get(META_NUMBER)
                    .map(|s| s.trim().to_uppercase())
                    .or_else(|| n.citation().and_then(|c| citation::article_number(&c)))
                    .or_else(|| citation::article_number(&n.text));
                stored.as_deref() == Some(wanted.as_str())
            })
            .map(|n| &n.id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// All edges with their ranks, in rank order.
    pub fn edges(&self) -> Vec<(u64, Edge)> {
        let mut out: Vec<(u64, Edge)> = self
            .graph
            .edge_references()
            .map(|e| {
                let edge = Edge::new(
                    self.graph[e.source()].id.clone(),
                    self.graph[e.target()].id.clone(),
                    e.weight().kind,
                );
                (e.weight().rank, edge)
            })
            .collect();
        out.sort_by_key(|(rank, _)| *rank);
        out
    }

    /// Ids of every node of the given kind, in insertion order.
    pub fn ids_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.graph
            .node_weights()
            .filter(|n| n.kind == kind)
            .map(|n| n.id.clone())
            .collect()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of nodes of one kind.
    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.graph.node_weights().filter(|n| n.kind == kind).count()
    }

    /// Number of edges of one kind.
    pub fn count_edge_kind(&self, kind: EdgeKind) -> usize {
        self.graph
            .edge_weights()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Capture the current size so later insertions can be undone.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            nodes: self.graph.node_count(),
            edges: self.graph.edge_count(),
            next_rank: self.next_rank,
        }
    }

    /// Remove every node and edge inserted after `savepoint`, newest first.
    pub fn rollback(&mut self, savepoint: Savepoint) {
        while self.graph.edge_count() > savepoint.edges {
            let last = EdgeIndex::new(self.graph.edge_count() - 1);
            if let Some((s, t)) = self.graph.edge_endpoints(last) {
                let kind = self.graph[last].kind;
                self.edge_keys.remove(&(s, t, kind));
            }
            self.graph.remove_edge(last);
        }

        while self.graph.node_count() > savepoint.nodes {
            let last = NodeIndex::new(self.graph.node_count() - 1);
            if let Some(node) = self.graph.remove_node(last) {
                self.node_index.remove(&node.id);
                let key = (node.kind, node.canonical_text());
                if self.texts.get(&key) == Some(&node.id) {
                    self.texts.remove(&key);
                }
            }
        }

        self.next_rank = savepoint.next_rank;
    }
}

//! Graph seeds: the JSON format used by `bootstrap` and `export`.
//!
//! ```json
//! {
//!   "nodes": [{"id": "S1", "kind": "scenario", "text": "..."}],
//!   "edges": [{"source": "S1", "target": "P1", "kind": "supports"}]
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, LexError, LexResult};
use crate::graph::index::KnowledgeGraph;
use crate::graph::{Edge, Node, NodeId, NodeKind};

/// Nodes and edges to load into an empty or existing graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSeed {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSeed {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Seed {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Seed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Seed {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Seed {
            path: "<export>".into(),
            message: e.to_string(),
        })
    }

    /// Snapshot of a graph: nodes in insertion order, edges in rank order.
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        Self {
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().into_iter().map(|(_, e)| e).collect(),
        }
    }
}

/// What a seed adds to a graph.
#[derive(Debug, Clone, Default)]
pub struct SeedPlan {
    /// Nodes not yet present, in seed order.
    pub nodes: Vec<Node>,
    /// Seed edges not yet stored.
    pub edges: Vec<Edge>,
    /// Seed nodes already present with identical content.
    pub unchanged: usize,
}

impl SeedPlan {
    /// New scenario nodes, which each need a vector.
    pub fn new_scenarios(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Scenario)
    }
}

/// Validate `seed` against `graph` and work out what is new.
///
/// A node whose id already exists must carry the same kind and text; anything
/// else is an inconsistency. Edge endpoints must resolve in the graph or the
/// seed, and the edge kind must permit the endpoint kinds.
pub fn plan(graph: &KnowledgeGraph, seed: &GraphSeed) -> LexResult<SeedPlan> {
    let mut plan = SeedPlan::default();
    let mut seen: HashMap<&NodeId, &Node> = HashMap::new();

    for node in &seed.nodes {
        if NodeId::new(node.id.as_str()).is_none() {
            return Err(LexError::inconsistency("seed contains a node with a blank id"));
        }
        if node.text.trim().is_empty() {
            return Err(LexError::inconsistency(format!("seed node {} has empty text", node.id)));
        }
        if seen.insert(&node.id, node).is_some() {
            return Err(LexError::inconsistency(format!(
                "seed declares node {} twice",
                node.id
            )));
        }
        match graph.node(&node.id) {
            Some(existing) if existing.kind == node.kind && existing.text == node.text => {
                plan.unchanged += 1;
            }
            Some(existing) => {
                return Err(LexError::inconsistency(format!(
                    "node {} already exists as a {} with different content",
                    node.id, existing.kind
                )));
            }
            None => plan.nodes.push(node.clone()),
        }
    }

    for edge in &seed.edges {
        let kind_of = |id: &NodeId| {
            seen.get(id)
                .map(|n| n.kind)
                .or_else(|| graph.node(id).map(|n| n.kind))
        };
        match (kind_of(&edge.source), kind_of(&edge.target)) {
            (Some(s), Some(t)) if edge.kind.permits(s, t) => {
                if !graph.has_edge(&edge.source, &edge.target, edge.kind) {
                    plan.edges.push(edge.clone());
                }
            }
            (Some(s), Some(t)) => {
                return Err(LexError::inconsistency(format!(
                    "{} edge cannot connect {s} {} to {t} {}",
                    edge.kind, edge.source, edge.target
                )));
            }
            _ => {
                return Err(LexError::inconsistency(format!(
                    "dangling {} edge: {} -> {}",
                    edge.kind, edge.source, edge.target
                )));
            }
        }
    }

    Ok(plan)
}

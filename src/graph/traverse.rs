//! Context expansion from a scenario node.
//!
//! Breadth-first over Related edges from the root scenario (bounded by
//! `related_depth`), then one hop along Supports from every expanded scenario
//! and one hop along Explains from every collected principle. A visited set
//! guarantees each node is expanded at most once, so Related cycles terminate.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::error::GraphError;

use super::index::{GraphResult, KnowledgeGraph};
use super::{EdgeKind, Node, NodeId, NodeKind};

/// Configuration for context expansion.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Maximum Related-edge hops from the root scenario. Zero disables them.
    pub related_depth: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self { related_depth: 1 }
    }
}

/// Everything the answer is grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    /// The matched or newly created scenario.
    pub scenario: Node,
    pub principles: Vec<Node>,
    pub articles: Vec<Node>,
    pub related_scenarios: Vec<Node>,
}

impl ContextBundle {
    /// No principles and no articles were reached.
    pub fn is_empty(&self) -> bool {
        self.principles.is_empty() && self.articles.is_empty()
    }
}

/// Nodes collected for one set, keyed by the rank of the first edge reaching them.
#[derive(Default)]
struct Collected<'g> {
    best: HashMap<&'g NodeId, (u64, &'g Node)>,
}

impl<'g> Collected<'g> {
    fn offer(&mut self, rank: u64, node: &'g Node) {
        self.best
            .entry(&node.id)
            .and_modify(|slot| {
                if rank < slot.0 {
                    *slot = (rank, node);
                }
            })
            .or_insert((rank, node));
    }

    fn into_sorted(self) -> Vec<Node> {
        let mut items: Vec<(u64, &Node)> = self.best.into_values().collect();
        items.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        items.into_iter().map(|(_, n)| n.clone()).collect()
    }
}

/// Expand a scenario into its context bundle.
///
/// Within each collected set, nodes are ordered by (edge-insertion rank, id).
pub fn expand(
    graph: &KnowledgeGraph,
    scenario_id: &NodeId,
    config: &TraversalConfig,
) -> GraphResult<ContextBundle> {
    let root = graph.node(scenario_id).ok_or_else(|| GraphError::NodeNotFound {
        id: scenario_id.to_string(),
    })?;
    if root.kind != NodeKind::Scenario {
        return Err(GraphError::NotAScenario {
            id: scenario_id.to_string(),
            actual: root.kind.to_string(),
        });
    }

    // Related-edge BFS: (scenario, depth).
    let mut visited: HashSet<&NodeId> = HashSet::new();
    let mut queue: VecDeque<(&Node, usize)> = VecDeque::new();
    let mut scenarios: Vec<&Node> = Vec::new();
    let mut related = Collected::default();

    visited.insert(&root.id);
    queue.push_back((root, 0));

    while let Some((scenario, depth)) = queue.pop_front() {
        scenarios.push(scenario);
        if depth >= config.related_depth {
            continue;
        }
        for (rank, next) in graph.outgoing(&scenario.id, EdgeKind::Related) {
            if next.kind != NodeKind::Scenario {
                continue;
            }
            if visited.insert(&next.id) {
                related.offer(rank, next);
                queue.push_back((next, depth + 1));
            }
        }
    }

    let mut principles = Collected::default();
    let mut principle_order: Vec<&Node> = Vec::new();
    for scenario in &scenarios {
        for (rank, principle) in graph.outgoing(&scenario.id, EdgeKind::Supports) {
            principles.offer(rank, principle);
            if visited.insert(&principle.id) {
                principle_order.push(principle);
            }
        }
    }

    let mut articles = Collected::default();
    for principle in &principle_order {
        for (rank, article) in graph.outgoing(&principle.id, EdgeKind::Explains) {
            articles.offer(rank, article);
        }
    }

    let bundle = ContextBundle {
        scenario: root.clone(),
        principles: principles.into_sorted(),
        articles: articles.into_sorted(),
        related_scenarios: related.into_sorted(),
    };

    tracing::debug!(
        scenario = %scenario_id,
        principles = bundle.principles.len(),
        articles = bundle.articles.len(),
        related = bundle.related_scenarios.len(),
        "expanded scenario context"
    );

    Ok(bundle)
}

//! Knowledge graph: typed legal nodes joined by typed directed edges.
//!
//! - **Store** ([`index::KnowledgeGraph`]): petgraph-backed node/edge storage with
//!   id lookup, per-kind neighbour queries, and savepoint rollback
//! - **Traversal** ([`traverse`]): context expansion from a scenario node
//!
//! Node kinds form a closed tag set. Edge legality is a function of the edge kind
//! and both endpoint kinds, checked on every insertion through [`EdgeKind::permits`].

pub mod index;
pub mod traverse;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

/// Unique, stable identifier of a node, shared by all node kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a `NodeId` from a raw string.
    ///
    /// Returns `None` if `raw` is empty or only whitespace.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(NodeId(raw))
        }
    }

    /// Id for the `n`-th node created by the auto-linker.
    pub(crate) fn generated(kind: NodeKind, n: u64) -> Self {
        Self(format!("{}-auto-{n}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of a node in the legal graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A concrete factual legal situation. Owns one vector in the index.
    Scenario,
    /// An abstract legal rule or doctrine.
    Principle,
    /// A specific statutory or constitutional provision.
    Article,
}

impl NodeKind {
    pub const ALL: [NodeKind; 3] = [NodeKind::Scenario, NodeKind::Principle, NodeKind::Article];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Scenario => "scenario",
            NodeKind::Principle => "principle",
            NodeKind::Article => "article",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata key holding an article's verbatim citation (e.g. "Article 21").
pub const META_CITATION: &str = "citation";
/// Metadata key holding an article's bare number (e.g. "21", "19(1)(a)").
pub const META_NUMBER: &str = "number";
/// Metadata key recording which component created a node.
pub const META_SOURCE: &str = "source";
/// `source` value of every node the auto-linker creates.
pub const AUTO_SOURCE: &str = "auto-linker";

/// A node of the legal knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Canonical natural-language content. Immutable after creation.
    pub text: String,
    /// Auxiliary attributes such as source citation or jurisdiction.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, text: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata attribute.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The verbatim citation of an article: the `citation` attribute, or
    /// `Article <number>` when only the number is recorded.
    pub fn citation(&self) -> Option<String> {
        if let Some(c) = self.metadata.get(META_CITATION) {
            return Some(c.clone());
        }
        self.metadata
            .get(META_NUMBER)
            .map(|n| format!("Article {}", n.trim()))
    }

    /// Whether the auto-linker created this node.
    pub fn is_auto_generated(&self) -> bool {
        self.metadata.get(META_SOURCE).map(String::as_str) == Some(AUTO_SOURCE)
    }

    /// Text key used for exact-duplicate detection.
    pub fn canonical_text(&self) -> String {
        canonical_text(&self.text)
    }
}

/// NFC-normalize, case-fold and collapse whitespace.
pub fn canonical_text(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    normalized
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Kind of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Scenario → Principle.
    Supports,
    /// Principle → Article.
    Explains,
    /// Scenario → Scenario or Principle → Principle.
    Related,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 3] = [EdgeKind::Supports, EdgeKind::Explains, EdgeKind::Related];

    /// Whether this edge kind may join a `source` node to a `target` node.
    pub fn permits(self, source: NodeKind, target: NodeKind) -> bool {
        match self {
            EdgeKind::Supports => source == NodeKind::Scenario && target == NodeKind::Principle,
            EdgeKind::Explains => source == NodeKind::Principle && target == NodeKind::Article,
            EdgeKind::Related => {
                source == target && matches!(source, NodeKind::Scenario | NodeKind::Principle)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::Supports => "supports",
            EdgeKind::Explains => "explains",
            EdgeKind::Related => "related",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed edge between two existing nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind) -> Self {
        Self {
            source,
            target,
            kind,
        }
    }
}

/// Edge data stored on petgraph edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub kind: EdgeKind,
    /// Global insertion rank, monotonically increasing.
    pub rank: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_rejects_blank() {
        assert!(NodeId::new("").is_none());
        assert!(NodeId::new("   ").is_none());
        assert_eq!(NodeId::new("S1").unwrap().as_str(), "S1");
    }

    #[test]
    fn edge_legality() {
        use NodeKind::*;
        assert!(EdgeKind::Supports.permits(Scenario, Principle));
        assert!(!EdgeKind::Supports.permits(Principle, Scenario));
        assert!(EdgeKind::Explains.permits(Principle, Article));
        assert!(!EdgeKind::Explains.permits(Scenario, Article));
        assert!(EdgeKind::Related.permits(Scenario, Scenario));
        assert!(EdgeKind::Related.permits(Principle, Principle));
        assert!(!EdgeKind::Related.permits(Article, Article));
        assert!(!EdgeKind::Related.permits(Scenario, Principle));
    }

    #[test]
    fn citation_prefers_explicit_attribute() {
        let id = NodeId::new("A1").unwrap();
        let numbered = Node::new(id.clone(), NodeKind::Article, "Protection of life")
            .with_meta(META_NUMBER, "21");
        assert_eq!(numbered.citation().as_deref(), Some("Article 21"));

        let cited = numbered.with_meta(META_CITATION, "Art. 21");
        assert_eq!(cited.citation().as_deref(), Some("Art. 21"));
    }

    #[test]
    fn auto_generated_follows_source_attribute() {
        let id = NodeId::new("principle-auto-0").unwrap();
        let node = Node::new(id, NodeKind::Principle, "Right to privacy");
        assert!(!node.is_auto_generated());
        assert!(node.clone().with_meta(META_SOURCE, AUTO_SOURCE).is_auto_generated());
        assert!(!node.with_meta(META_SOURCE, "bootstrap").is_auto_generated());
    }

    #[test]
    fn canonical_text_folds_case_and_space() {
        assert_eq!(
            canonical_text("  Police   Search\nwithout WARRANT "),
            "police search without warrant"
        );
    }
}

//! Rich diagnostic error types for the lexgraph engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives.
//! The top-level [`LexError`] is what crosses the engine boundary: every variant
//! maps to a stable machine code (see [`LexError::code`]) and a human-readable
//! message. Provider error text never ends up in a `LexError`; it is logged and
//! replaced by an engine-authored reason.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// The external call that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStage {
    Embedding,
    Generation,
    Simplification,
}

impl std::fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamStage::Embedding => write!(f, "embedding"),
            UpstreamStage::Generation => write!(f, "generation"),
            UpstreamStage::Simplification => write!(f, "simplification"),
        }
    }
}

/// Top-level error type for the lexgraph engine.
#[derive(Debug, Error, Diagnostic)]
pub enum LexError {
    #[error("embedding unavailable: {reason}")]
    #[diagnostic(
        code(lexgraph::embedding_unavailable),
        help(
            "The embedding provider could not produce a vector for this text. \
             Check that the question is not empty and that the provider is reachable, \
             then retry."
        )
    )]
    EmbeddingUnavailable { reason: String },

    #[error("generation failed: {reason}")]
    #[diagnostic(
        code(lexgraph::generation_failed),
        help(
            "No existing scenario matched and the generation provider could not \
             produce usable graph content. Retry, or lower the match threshold."
        )
    )]
    GenerationFailed { reason: String },

    #[error("{stage} call timed out after {} ms", .timeout.as_millis())]
    #[diagnostic(
        code(lexgraph::upstream_timeout),
        help("Increase the upstream timeout or check the provider's latency.")
    )]
    UpstreamTimeout {
        stage: UpstreamStage,
        timeout: Duration,
    },

    #[error("knowledge graph inconsistency: {detail}")]
    #[diagnostic(
        code(lexgraph::graph_inconsistency),
        help(
            "The graph store or vector index violates a core invariant. This points \
             at a bootstrap file or storage-layer bug and must not be patched around. \
             Inspect the data directory with `lexgraph check`."
        )
    )]
    GraphInconsistency { detail: String },

    #[error("no principles or articles are linked to scenario {scenario_id}")]
    #[diagnostic(
        code(lexgraph::no_context_found),
        help("The answer names only the scenario. Link principles to it to enrich answers.")
    )]
    NoContextFound { scenario_id: String },

    #[error("unknown node: {id}")]
    #[diagnostic(
        code(lexgraph::unknown_node),
        help("No scenario with this id exists. List scenarios with `lexgraph match <question>`.")
    )]
    UnknownNode { id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl LexError {
    /// Stable machine-readable code, independent of the message text.
    pub fn code(&self) -> &'static str {
        match self {
            LexError::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            LexError::GenerationFailed { .. } => "GENERATION_FAILED",
            LexError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            LexError::GraphInconsistency { .. } => "GRAPH_INCONSISTENCY",
            LexError::NoContextFound { .. } => "NO_CONTEXT_FOUND",
            LexError::UnknownNode { .. } => "UNKNOWN_NODE",
            LexError::Store(_) => "STORAGE_ERROR",
            LexError::Config(_) => "INVALID_CONFIG",
        }
    }

    /// Transient upstream failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LexError::EmbeddingUnavailable { .. }
                | LexError::GenerationFailed { .. }
                | LexError::UpstreamTimeout { .. }
        )
    }

    /// Failures that mean a core invariant is broken; the process should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LexError::GraphInconsistency { .. })
    }

    /// User-facing answer text for a failed query.
    pub fn degraded_answer(&self) -> String {
        if self.is_retryable() {
            format!(
                "Unable to answer your legal question right now [{}]: {self}. Please try again.",
                self.code()
            )
        } else {
            format!("Unable to answer your legal question [{}]: {self}.", self.code())
        }
    }

    pub(crate) fn inconsistency(detail: impl Into<String>) -> Self {
        LexError::GraphInconsistency {
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node not found: {id}")]
    #[diagnostic(
        code(lexgraph::graph::node_not_found),
        help("Insert the node before referencing it from an edge.")
    )]
    NodeNotFound { id: String },

    #[error("node id collision: {id}")]
    #[diagnostic(
        code(lexgraph::graph::id_collision),
        help("Node ids are unique across all node kinds. Rename one of the nodes.")
    )]
    IdCollision { id: String },

    #[error("dangling {kind} edge: {source_id} -> {target_id}")]
    #[diagnostic(
        code(lexgraph::graph::dangling_edge),
        help("Both endpoints of an edge must exist before the edge is inserted.")
    )]
    DanglingEdge {
        kind: String,
        source_id: String,
        target_id: String,
    },

    #[error("{kind} edge cannot connect {source_kind} to {target_kind}")]
    #[diagnostic(
        code(lexgraph::graph::illegal_edge),
        help(
            "Supports runs Scenario -> Principle, Explains runs Principle -> Article, \
             Related joins two Scenarios or two Principles."
        )
    )]
    IllegalEdge {
        kind: String,
        source_kind: String,
        target_kind: String,
    },

    #[error("node {id} is a {actual}, expected a scenario")]
    #[diagnostic(
        code(lexgraph::graph::not_a_scenario),
        help("Traversal starts from scenario nodes only.")
    )]
    NotAScenario { id: String, actual: String },

    #[error("empty node text for {id}")]
    #[diagnostic(
        code(lexgraph::graph::empty_text),
        help("Every node needs canonical text content.")
    )]
    EmptyText { id: String },
}

impl From<GraphError> for LexError {
    fn from(err: GraphError) -> Self {
        LexError::inconsistency(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Vector index errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(lexgraph::vector::dim_mismatch),
        help(
            "Every vector in the index must come from the same embedding model. \
             Re-bootstrap the graph after changing the embedding provider."
        )
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding space mismatch: index holds {stored}, provider produces {provider}")]
    #[diagnostic(
        code(lexgraph::vector::space_mismatch),
        help(
            "Vectors from different embedding models are not comparable. \
             Use the original provider or start from a fresh data directory."
        )
    )]
    SpaceMismatch { stored: String, provider: String },

    #[error("vector for {id} has zero or non-finite norm")]
    #[diagnostic(
        code(lexgraph::vector::degenerate),
        help("Cosine similarity is undefined for zero or NaN vectors.")
    )]
    Degenerate { id: String },

    #[error("vector already indexed for {id}")]
    #[diagnostic(
        code(lexgraph::vector::duplicate),
        help("Each scenario owns exactly one vector.")
    )]
    Duplicate { id: String },
}

impl From<VectorError> for LexError {
    fn from(err: VectorError) -> Self {
        LexError::inconsistency(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(lexgraph::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(lexgraph::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             If the problem persists, inspect the data directory or start from a fresh one."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(lexgraph::store::serde),
        help(
            "Failed to serialize or deserialize stored data. \
             The on-disk format may come from an incompatible version."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(lexgraph::config::invalid), help("Check the engine settings. {message}"))]
    Invalid { message: String },

    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(lexgraph::config::read),
        help("Check that the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file: {path}")]
    #[diagnostic(
        code(lexgraph::config::write),
        help("Check that the parent directory is writable.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(lexgraph::config::parse),
        help("The settings file must be valid TOML. See `lexgraph --help` for the keys.")
    )]
    Parse { path: String, message: String },

    #[error("failed to read graph seed {path}: {message}")]
    #[diagnostic(
        code(lexgraph::config::seed),
        help("A graph seed is a JSON object with `nodes` and `edges` arrays.")
    )]
    Seed { path: String, message: String },
}

/// Convenience alias for functions returning lexgraph results.
pub type LexResult<T> = std::result::Result<T, LexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_is_an_inconsistency() {
        let err: LexError = GraphError::DanglingEdge {
            kind: "supports".into(),
            source_id: "s1".into(),
            target_id: "p9".into(),
        }
        .into();
        assert!(matches!(err, LexError::GraphInconsistency { .. }));
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert_eq!(err.code(), "GRAPH_INCONSISTENCY");
    }

    #[test]
    fn upstream_failures_are_retryable() {
        let errs = [
            LexError::EmbeddingUnavailable {
                reason: "empty text".into(),
            },
            LexError::GenerationFailed {
                reason: "no JSON object".into(),
            },
            LexError::UpstreamTimeout {
                stage: UpstreamStage::Generation,
                timeout: Duration::from_millis(250),
            },
        ];
        for err in &errs {
            assert!(err.is_retryable(), "{err}");
            assert!(!err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn timeout_message_names_stage_and_duration() {
        let err = LexError::UpstreamTimeout {
            stage: UpstreamStage::Embedding,
            timeout: Duration::from_millis(1500),
        };
        let msg = err.to_string();
        assert!(msg.contains("embedding"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn degraded_answer_carries_stable_code() {
        let err = LexError::GenerationFailed {
            reason: "generation provider unavailable".into(),
        };
        let answer = err.degraded_answer();
        assert!(answer.contains("GENERATION_FAILED"));
        assert!(answer.contains("try again"));
    }
}

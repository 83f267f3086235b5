//! Engine facade: top-level API for the lexgraph system.
//!
//! The `Engine` owns the knowledge base and every component working on it, and
//! provides the public interface for resolving questions, bootstrapping and
//! inspecting the graph.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::bootstrap::{self, GraphSeed};
use crate::compose::AnswerComposer;
use crate::error::{ConfigError, LexError, LexResult};
use crate::graph::traverse::{self, ContextBundle, TraversalConfig};
use crate::graph::{EdgeKind, NodeId, NodeKind};
use crate::knowledge::{CommitBatch, CommitReport, ConsistencyReport, IndexConfig, KnowledgeBase};
use crate::linker::{AutoLinker, LinkOutcome, ReuseThresholds};
use crate::matcher::{MatchCandidate, SemanticMatcher, Threshold};
use crate::provider::{EmbeddingProvider, GenerationProvider, SimplificationProvider, embed_text};
use crate::store::GraphStore;

/// Configuration for the lexgraph engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
    /// Inclusive match threshold on the raw cosine scale (default: 0.75).
    pub threshold: Threshold,
    /// Number of candidates returned by the matcher (default: 5).
    pub top_k: usize,
    /// Related-edge hops followed during expansion (default: 1).
    pub related_depth: usize,
    /// Bound on every provider call (default: 30 s).
    pub upstream_timeout: Duration,
    /// Similarity at which a drafted principle reuses an existing one (default: 0.92).
    pub principle_reuse: Threshold,
    /// Similarity at which a drafted article reuses an existing one (default: 0.75).
    pub article_reuse: Threshold,
    pub index: IndexConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            threshold: Threshold::DEFAULT,
            top_k: 5,
            related_depth: 1,
            upstream_timeout: Duration::from_secs(30),
            principle_reuse: Threshold::PRINCIPLE_REUSE,
            article_reuse: Threshold::DEFAULT,
            index: IndexConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "top_k must be > 0".into(),
            });
        }
        if self.upstream_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "upstream timeout must be > 0".into(),
            });
        }
        if self.index.capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "index capacity must be > 0".into(),
            });
        }
        Ok(())
    }
}

/// The three external collaborators.
#[derive(Clone)]
pub struct Providers {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn GenerationProvider>,
    pub simplifier: Arc<dyn SimplificationProvider>,
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("embedding_space", &self.embedder.space())
            .finish()
    }
}

/// How the answering scenario was found.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// An existing scenario cleared the threshold.
    GraphMatch { score: f32 },
    /// The auto-linker committed new content.
    Generated,
    /// The auto-linker found an existing scenario covering its draft.
    Reused { score: Option<f32> },
}

impl std::fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionMethod::GraphMatch { score } => write!(f, "graph match (score {score:.4})"),
            ResolutionMethod::Generated => write!(f, "generated"),
            ResolutionMethod::Reused { score: Some(score) } => {
                write!(f, "reused similar scenario (score {score:.4})")
            }
            ResolutionMethod::Reused { score: None } => write!(f, "reused identical scenario"),
        }
    }
}

/// Sizes of the context an answer was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextSummary {
    pub scenario_id: NodeId,
    pub principles: usize,
    pub articles: usize,
    pub related_scenarios: usize,
    /// Similarity of the answering scenario, when one was measured.
    pub score: Option<f32>,
}

/// The answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub answer: String,
    pub scenario_id: NodeId,
    pub method: ResolutionMethod,
    pub context_summary: ContextSummary,
    pub short_answer: String,
    /// Stable code of the degradation applied to `answer`, if any.
    pub degraded: Option<&'static str>,
}

/// Outcome of loading a graph seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub committed: CommitReport,
    /// Seed nodes already present with identical content.
    pub unchanged: usize,
}

/// The lexgraph query-resolution engine.
///
/// Owns the knowledge base, matcher, auto-linker and composer. `Send + Sync`;
/// share it through an `Arc`.
pub struct Engine {
    config: EngineConfig,
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn EmbeddingProvider>,
    matcher: SemanticMatcher,
    linker: AutoLinker,
    composer: AnswerComposer,
}

impl Engine {
    /// Create a new engine with the given configuration and providers.
    ///
    /// With a data directory the stored graph is replayed; its embedding space
    /// must match the embedding provider's.
    pub fn new(config: EngineConfig, providers: Providers) -> LexResult<Self> {
        config.validate()?;
        let space = providers.embedder.space();
        if space.dimension == 0 {
            return Err(ConfigError::Invalid {
                message: "embedding dimension must be > 0".into(),
            }
            .into());
        }

        tracing::info!(
            space = %space,
            threshold = config.threshold.value(),
            top_k = config.top_k,
            related_depth = config.related_depth,
            "initializing lexgraph engine"
        );

        let kb = match &config.data_dir {
            Some(dir) => {
                let store = GraphStore::open(dir)?;
                KnowledgeBase::open(store, space, config.index)?
            }
            None => KnowledgeBase::in_memory(space, config.index),
        };
        let kb = Arc::new(kb);

        let matcher = SemanticMatcher::new(
            Arc::clone(&kb),
            Arc::clone(&providers.embedder),
            config.top_k,
            config.threshold,
        );
        let linker = AutoLinker::new(
            Arc::clone(&kb),
            Arc::clone(&providers.embedder),
            providers.generator,
            ReuseThresholds {
                scenario: config.threshold,
                principle: config.principle_reuse,
                article: config.article_reuse,
            },
        );
        let composer = AnswerComposer::new(providers.simplifier);

        Ok(Self {
            config,
            kb,
            embedder: providers.embedder,
            matcher,
            linker,
            composer,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Answer `question` with the configured upstream timeout.
    pub async fn resolve(&self, question: &str) -> LexResult<Resolution> {
        self.resolve_with_timeout(question, self.config.upstream_timeout).await
    }

    /// Answer `question`, bounding every provider call by `timeout`.
    pub async fn resolve_with_timeout(&self, question: &str, timeout: Duration) -> LexResult<Resolution> {
        let candidates = self.matcher.match_query(question, timeout).await?;
        if let Some(best) = self.matcher.accept(&candidates) {
            let method = ResolutionMethod::GraphMatch { score: best.score };
            return self.answer(question, best.scenario_id.clone(), method, timeout).await;
        }

        tracing::info!(
            best = candidates.first().map(|c| c.score),
            threshold = self.config.threshold.value(),
            "no scenario cleared the threshold, auto-linking"
        );
        self.generate(question, timeout).await
    }

    /// Skip matching and go straight to the auto-linker.
    pub async fn resolve_forced(&self, question: &str, timeout: Duration) -> LexResult<Resolution> {
        if question.trim().is_empty() {
            return Err(LexError::EmbeddingUnavailable {
                reason: "question is empty".into(),
            });
        }
        self.generate(question, timeout).await
    }

    async fn generate(&self, question: &str, timeout: Duration) -> LexResult<Resolution> {
        let (scenario_id, method) = match self.linker.link(question, timeout).await? {
            LinkOutcome::Created { scenario_id, .. } => (scenario_id, ResolutionMethod::Generated),
            LinkOutcome::Reused { scenario_id, score } => {
                (scenario_id, ResolutionMethod::Reused { score })
            }
        };
        self.answer(question, scenario_id, method, timeout).await
    }

    async fn answer(
        &self,
        question: &str,
        scenario_id: NodeId,
        method: ResolutionMethod,
        timeout: Duration,
    ) -> LexResult<Resolution> {
        let bundle = {
            let state = self.kb.read()?;
            traverse::expand(&state.graph, &scenario_id, &self.traversal())?
        };

        let score = match method {
            ResolutionMethod::GraphMatch { score } => Some(score),
            ResolutionMethod::Reused { score } => score,
            ResolutionMethod::Generated => None,
        };
        let context_summary = ContextSummary {
            scenario_id: scenario_id.clone(),
            principles: bundle.principles.len(),
            articles: bundle.articles.len(),
            related_scenarios: bundle.related_scenarios.len(),
            score,
        };
        let short_answer = AnswerComposer::short_answer(&bundle);

        if bundle.is_empty() {
            let err = LexError::NoContextFound {
                scenario_id: scenario_id.to_string(),
            };
            tracing::warn!(scenario = %scenario_id, code = err.code(), "{err}");
            return Ok(Resolution {
                answer: AnswerComposer::compose_without_context(&bundle.scenario),
                scenario_id,
                method,
                context_summary,
                short_answer,
                degraded: Some(err.code()),
            });
        }

        let composed = self.composer.compose(question, &bundle, timeout).await;
        tracing::info!(
            scenario = %scenario_id,
            method = %method,
            principles = context_summary.principles,
            articles = context_summary.articles,
            fallbacks = composed.fallbacks,
            "resolved question"
        );

        Ok(Resolution {
            answer: composed.text,
            scenario_id,
            method,
            context_summary,
            short_answer,
            degraded: None,
        })
    }

    fn traversal(&self) -> TraversalConfig {
        TraversalConfig {
            related_depth: self.config.related_depth,
        }
    }

    /// Ranked scenario candidates for `question`, whether or not they clear the threshold.
    pub async fn match_query(&self, question: &str) -> LexResult<Vec<MatchCandidate>> {
        self.matcher
            .match_query(question, self.config.upstream_timeout)
            .await
    }

    /// Context bundle of an existing scenario.
    pub fn expand(&self, scenario_id: &str) -> LexResult<ContextBundle> {
        let unknown = || LexError::UnknownNode {
            id: scenario_id.to_string(),
        };
        let id = NodeId::new(scenario_id).ok_or_else(unknown)?;
        let state = self.kb.read()?;
        match state.graph.node(&id) {
            Some(node) if node.kind == NodeKind::Scenario => {}
            _ => return Err(unknown()),
        }
        Ok(traverse::expand(&state.graph, &id, &self.traversal())?)
    }

    /// Load a graph seed: validate, embed new scenarios, commit as one batch.
    ///
    /// Re-running the same seed is a no-op.
    pub async fn bootstrap(&self, seed: &GraphSeed) -> LexResult<BootstrapReport> {
        let _commit = self.kb.lock_commits().await;

        let plan = {
            let state = self.kb.read()?;
            bootstrap::plan(&state.graph, seed)?
        };

        let mut vectors = Vec::new();
        for scenario in plan.new_scenarios() {
            let vector =
                embed_text(self.embedder.as_ref(), &scenario.text, self.config.upstream_timeout)
                    .await?;
            vectors.push((scenario.id.clone(), vector));
        }

        let batch = CommitBatch {
            nodes: plan.nodes,
            edges: plan.edges,
            vectors,
            allocator_next: None,
        };
        let committed = if batch.is_empty() {
            CommitReport::default()
        } else {
            self.kb.commit(batch)?
        };

        tracing::info!(
            nodes = committed.nodes,
            edges = committed.edges,
            vectors = committed.vectors,
            unchanged = plan.unchanged,
            "bootstrap complete"
        );
        Ok(BootstrapReport {
            committed,
            unchanged: plan.unchanged,
        })
    }

    /// The whole graph in bootstrap format.
    pub fn export(&self) -> LexResult<GraphSeed> {
        let state = self.kb.read()?;
        Ok(GraphSeed::from_graph(&state.graph))
    }

    /// Verify the graph/index lock-step invariant.
    pub fn check_consistency(&self) -> LexResult<ConsistencyReport> {
        self.kb.check_consistency()
    }

    /// Get engine statistics.
    pub fn info(&self) -> LexResult<EngineInfo> {
        let state = self.kb.read()?;
        let graph = &state.graph;
        Ok(EngineInfo {
            scenarios: graph.count_kind(NodeKind::Scenario),
            principles: graph.count_kind(NodeKind::Principle),
            articles: graph.count_kind(NodeKind::Article),
            supports: graph.count_edge_kind(EdgeKind::Supports),
            explains: graph.count_edge_kind(EdgeKind::Explains),
            related: graph.count_edge_kind(EdgeKind::Related),
            auto_generated: graph.nodes().filter(|n| n.is_auto_generated()).count(),
            vectors: state.index.len(),
            embedding_space: state.index.space().to_string(),
            threshold: self.config.threshold.value(),
            persistent: self.kb.is_persistent(),
        })
    }
}

/// Engine statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInfo {
    pub scenarios: usize,
    pub principles: usize,
    pub articles: usize,
    pub supports: usize,
    pub explains: usize,
    pub related: usize,
    pub auto_generated: usize,
    pub vectors: usize,
    pub embedding_space: String,
    pub threshold: f32,
    pub persistent: bool,
}

impl EngineInfo {
    pub fn nodes(&self) -> usize {
        self.scenarios + self.principles + self.articles
    }

    pub fn edges(&self) -> usize {
        self.supports + self.explains + self.related
    }
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "lexgraph engine info")?;
        writeln!(f, "  nodes:           {}", self.nodes())?;
        writeln!(f, "    scenarios:     {}", self.scenarios)?;
        writeln!(f, "    principles:    {}", self.principles)?;
        writeln!(f, "    articles:      {}", self.articles)?;
        writeln!(f, "  edges:           {}", self.edges())?;
        writeln!(f, "    supports:      {}", self.supports)?;
        writeln!(f, "    explains:      {}", self.explains)?;
        writeln!(f, "    related:       {}", self.related)?;
        writeln!(f, "  auto-generated:  {}", self.auto_generated)?;
        writeln!(f, "  vectors:         {}", self.vectors)?;
        writeln!(f, "  embedding space: {}", self.embedding_space)?;
        writeln!(f, "  threshold:       {}", self.threshold)?;
        writeln!(f, "  persistent:      {}", self.persistent)?;
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("knowledge", &self.kb)
            .field("matcher", &self.matcher)
            .finish()
    }
}

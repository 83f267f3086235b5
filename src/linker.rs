//! Auto-linker: synthesizes graph content for questions nothing matches.
//!
//! Flow:
//! 1. Ask the generation provider for a structured draft (scenario, principles,
//!    articles, principle→article links)
//! 2. Take the commit lock; everything below is serialized across callers
//! 3. Reuse an existing scenario with the same canonical text
//! 4. Re-embed the drafted scenario; reuse the nearest scenario if it clears
//!    the threshold
//! 5. Otherwise commit scenario, principles, articles, edges and the scenario
//!    vector as one atomic batch
//!
//! Principles are reused by exact text, then by embedding similarity. Articles
//! are reused by citation number, then by exact text, then by similarity to an
//! article that carries no conflicting number. Principle and article vectors
//! are kept in a per-linker cache, filled on first use; only scenarios live in
//! the vector index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;

use crate::citation;
use crate::error::{LexError, LexResult, UpstreamStage};
use crate::graph::index::KnowledgeGraph;
use crate::graph::{
    AUTO_SOURCE, Edge, EdgeKind, META_CITATION, META_NUMBER, META_SOURCE, Node, NodeId, NodeKind,
};
use crate::knowledge::{CommitBatch, CommitReport, KnowledgeBase};
use crate::matcher::Threshold;
use crate::provider::{EmbeddingProvider, GenerationProvider, bounded, embed_text};
use crate::vector;

/// Metadata key: seconds since the Unix epoch at creation.
pub const META_CREATED_AT: &str = "created_at";
/// Metadata key: the question that triggered the creation.
pub const META_QUERY: &str = "query";

/// Inclusive reuse thresholds for drafted content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReuseThresholds {
    pub scenario: Threshold,
    pub principle: Threshold,
    pub article: Threshold,
}

impl Default for ReuseThresholds {
    fn default() -> Self {
        Self {
            scenario: Threshold::DEFAULT,
            principle: Threshold::PRINCIPLE_REUSE,
            article: Threshold::DEFAULT,
        }
    }
}

/// Structured content drafted by the generation provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDraft {
    pub scenario: String,
    pub principles: Vec<String>,
    pub articles: Vec<String>,
    /// Raw "Principle N -> Article X,Y" lines.
    pub links: Vec<String>,
}

#[derive(Deserialize)]
struct RawDraft {
    #[serde(default)]
    scenario: Option<RawScenario>,
    #[serde(default)]
    principles: Vec<String>,
    #[serde(default)]
    articles: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Deserialize)]
struct RawScenario {
    #[serde(default)]
    example: Option<String>,
}

/// Result of one auto-link run.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    /// New content was committed.
    Created {
        scenario_id: NodeId,
        report: CommitReport,
    },
    /// An existing scenario already covers the drafted one. `score` is the
    /// similarity for a vector match and `None` for an exact-text match.
    Reused {
        scenario_id: NodeId,
        score: Option<f32>,
    },
}

impl LinkOutcome {
    pub fn scenario_id(&self) -> &NodeId {
        match self {
            LinkOutcome::Created { scenario_id, .. } | LinkOutcome::Reused { scenario_id, .. } => {
                scenario_id
            }
        }
    }
}

/// Prompt asking for a JSON draft for `query`.
pub fn build_prompt(query: &str) -> String {
    format!(
        r#"You are a legal AI assistant specializing in Indian law. Analyze the following query and provide a structured response.

Query: {query}

A principle is a foundational legal idea that guides how constitutional rights are interpreted and applied in real-life situations.
Principles should be formal, objective, and concise, focusing on the intent and scope of the law.

Respond with a JSON object containing:
1. "scenario": {{"example": "A clear description of the legal situation as a scenario"}}
2. "principles": ["Relevant legal principles as strings"]
3. "articles": ["Highly relevant constitutional articles, each starting with its citation, e.g. \"Article 21: ...\""]
4. "links": ["Principle N -> Article X,Y", ...] where N is the position in the principles list and X,Y are article numbers

Keep the principles in the links in the same order as the principles list.
Reply with the JSON object only.
JSON Response:
"#
    )
}

/// Parse provider output into a draft.
///
/// Accepts prose around the JSON object; a missing scenario falls back to the
/// question text.
pub fn parse_draft(raw: &str, query: &str) -> Result<GenerationDraft, String> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &raw[s..=e],
        _ => return Err("no JSON object found in response".into()),
    };

    let parsed: RawDraft =
        serde_json::from_str(json).map_err(|e| format!("JSON parse error: {e}"))?;

    let scenario = parsed
        .scenario
        .and_then(|s| s.example)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| query.trim().to_string());

    let clean = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    };

    Ok(GenerationDraft {
        scenario,
        principles: clean(parsed.principles),
        articles: clean(parsed.articles),
        links: clean(parsed.links),
    })
}

/// Split a link line into its principle position (1-based) and article references.
fn parse_link(line: &str, position: usize) -> (usize, Vec<String>) {
    match line.split_once("->") {
        Some((lhs, rhs)) => {
            let principle = lhs
                .split(|c: char| !c.is_ascii_digit())
                .find(|t| !t.is_empty())
                .and_then(|t| t.parse().ok())
                .unwrap_or(position + 1);
            (principle, citation::linked_numbers(rhs))
        }
        None => (position + 1, citation::linked_numbers(line)),
    }
}

/// Embedding of an existing principle or article.
#[derive(Debug, Clone)]
struct NodeVector {
    kind: NodeKind,
    values: Vec<f32>,
    norm: f32,
}

impl NodeVector {
    fn new(kind: NodeKind, values: Vec<f32>) -> Self {
        let norm = vector::norm(&values);
        Self { kind, values, norm }
    }
}

/// Existing nodes that drafted principles and articles may stand for.
#[derive(Debug, Default)]
struct DraftMatches {
    principles: Vec<Option<(NodeId, f32)>>,
    articles: Vec<Option<(NodeId, f32)>>,
    /// Vectors of drafted texts, cached for the nodes this run creates.
    vectors: HashMap<String, Vec<f32>>,
}

impl DraftMatches {
    fn principle(&self, position: usize) -> Option<&(NodeId, f32)> {
        self.principles.get(position).and_then(Option::as_ref)
    }

    fn article(&self, position: usize) -> Option<&(NodeId, f32)> {
        self.articles.get(position).and_then(Option::as_ref)
    }
}

/// Generates, deduplicates and commits new graph content.
pub struct AutoLinker {
    kb: Arc<KnowledgeBase>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    thresholds: ReuseThresholds,
    node_vectors: Mutex<HashMap<NodeId, NodeVector>>,
}

impl AutoLinker {
    pub fn new(
        kb: Arc<KnowledgeBase>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        thresholds: ReuseThresholds,
    ) -> Self {
        Self {
            kb,
            embedder,
            generator,
            thresholds,
            node_vectors: Mutex::new(HashMap::new()),
        }
    }

    /// Draft content for `query` and commit it unless a duplicate exists.
    pub async fn link(&self, query: &str, timeout: Duration) -> LexResult<LinkOutcome> {
        let draft = self.draft(query, timeout).await?;

        let _commit = self.kb.lock_commits().await;

        let existing = {
            let state = self.kb.read()?;
            state
                .graph
                .find_by_text(NodeKind::Scenario, &draft.scenario)
                .cloned()
        };
        if let Some(scenario_id) = existing {
            tracing::info!(scenario = %scenario_id, "reusing scenario with identical text");
            return Ok(LinkOutcome::Reused {
                scenario_id,
                score: None,
            });
        }

        let vector = embed_text(self.embedder.as_ref(), &draft.scenario, timeout).await?;

        let nearest = {
            let state = self.kb.read()?;
            state.index.search(&vector, 1)?.into_iter().next()
        };
        if let Some(hit) = nearest {
            if self.thresholds.scenario.accepts(hit.score) {
                tracing::info!(scenario = %hit.id, score = hit.score, "reusing similar scenario");
                return Ok(LinkOutcome::Reused {
                    scenario_id: hit.id,
                    score: Some(hit.score),
                });
            }
        }

        let matches = self.match_drafted(&draft, timeout).await?;

        let batch = {
            let state = self.kb.read()?;
            self.build_batch(&state.graph, &draft, &matches, query, vector)
        };
        let scenario_id = batch
            .nodes
            .first()
            .map(|n| n.id.clone())
            .ok_or_else(|| LexError::inconsistency("auto-link batch without a scenario"))?;
        let fresh: Vec<(NodeId, NodeVector)> = batch
            .nodes
            .iter()
            .filter(|n| n.kind != NodeKind::Scenario)
            .filter_map(|n| {
                matches
                    .vectors
                    .get(&n.text)
                    .map(|v| (n.id.clone(), NodeVector::new(n.kind, v.clone())))
            })
            .collect();

        let report = self.kb.commit(batch)?;
        self.node_vectors()?.extend(fresh);
        tracing::info!(
            scenario = %scenario_id,
            nodes = report.nodes,
            edges = report.edges,
            "auto-linked new scenario"
        );
        Ok(LinkOutcome::Created {
            scenario_id,
            report,
        })
    }

    async fn draft(&self, query: &str, timeout: Duration) -> LexResult<GenerationDraft> {
        let prompt = build_prompt(query);
        let raw = bounded(UpstreamStage::Generation, timeout, self.generator.generate(&prompt))
            .await?
            .map_err(|e| {
                tracing::warn!(error = %e, "generation provider failed");
                LexError::GenerationFailed {
                    reason: "generation provider failed".into(),
                }
            })?;

        parse_draft(&raw, query).map_err(|detail| {
            tracing::warn!(%detail, "unparseable generation output");
            LexError::GenerationFailed {
                reason: "generation output was not a usable JSON draft".into(),
            }
        })
    }

    fn node_vectors(&self) -> LexResult<MutexGuard<'_, HashMap<NodeId, NodeVector>>> {
        self.node_vectors
            .lock()
            .map_err(|_| LexError::inconsistency("node vector cache lock poisoned"))
    }

    /// Find existing principles and articles similar to the drafted ones.
    ///
    /// Best effort: an embedding failure ends the search and the remaining
    /// drafted content falls back to exact reuse.
    async fn match_drafted(&self, draft: &GenerationDraft, timeout: Duration) -> LexResult<DraftMatches> {
        let mut matches = DraftMatches {
            principles: vec![None; draft.principles.len()],
            articles: vec![None; draft.articles.len()],
            vectors: HashMap::new(),
        };

        // Drafted content with an exact counterpart needs no embedding.
        let (uncached, pending) = {
            let state = self.kb.read()?;
            let cache = self.node_vectors()?;
            let uncached: Vec<(NodeId, NodeKind, String)> = state
                .graph
                .nodes()
                .filter(|n| matches!(n.kind, NodeKind::Principle | NodeKind::Article))
                .filter(|n| !cache.contains_key(&n.id))
                .map(|n| (n.id.clone(), n.kind, n.text.clone()))
                .collect();

            let mut pending: Vec<(NodeKind, usize)> = Vec::new();
            for (i, text) in draft.principles.iter().enumerate() {
                if state.graph.find_by_text(NodeKind::Principle, text).is_none() {
                    pending.push((NodeKind::Principle, i));
                }
            }
            for (i, text) in draft.articles.iter().enumerate() {
                let by_number = citation::article_number(text)
                    .is_some_and(|n| state.graph.find_article_by_number(&n).is_some());
                if !by_number && state.graph.find_by_text(NodeKind::Article, text).is_none() {
                    pending.push((NodeKind::Article, i));
                }
            }
            (uncached, pending)
        };
        if pending.is_empty() {
            return Ok(matches);
        }

        for (id, kind, text) in uncached {
            match embed_text(self.embedder.as_ref(), &text, timeout).await {
                Ok(values) => {
                    self.node_vectors()?.insert(id, NodeVector::new(kind, values));
                }
                Err(err) => {
                    tracing::warn!(node = %id, error = %err, "cannot embed existing node; similarity reuse skipped");
                    return Ok(matches);
                }
            }
        }

        for (kind, i) in pending {
            let (text, threshold) = match kind {
                NodeKind::Principle => (&draft.principles[i], self.thresholds.principle),
                _ => (&draft.articles[i], self.thresholds.article),
            };
            let values = match embed_text(self.embedder.as_ref(), text, timeout).await {
                Ok(values) => values,
                Err(err) => {
                    tracing::warn!(%kind, error = %err, "cannot embed drafted text; similarity reuse skipped");
                    return Ok(matches);
                }
            };
            let best = self.nearest(kind, &values)?;
            matches.vectors.insert(text.clone(), values);
            if let Some((id, score)) = best.filter(|(_, score)| threshold.accepts(*score)) {
                let slot = match kind {
                    NodeKind::Principle => &mut matches.principles[i],
                    _ => &mut matches.articles[i],
                };
                *slot = Some((id, score));
            }
        }
        Ok(matches)
    }

    /// Most similar cached node of `kind`, ties broken by ascending id.
    fn nearest(&self, kind: NodeKind, values: &[f32]) -> LexResult<Option<(NodeId, f32)>> {
        let norm = vector::norm(values);
        let cache = self.node_vectors()?;
        let mut best: Option<(&NodeId, f32)> = None;
        for (id, v) in cache.iter().filter(|(_, v)| v.kind == kind) {
            let score = vector::cosine(values, norm, &v.values, v.norm);
            let better = match best {
                None => true,
                Some((best_id, best_score)) => {
                    score > best_score || (score == best_score && id < best_id)
                }
            };
            if better {
                best = Some((id, score));
            }
        }
        Ok(best.map(|(id, score)| (id.clone(), score)))
    }

    fn build_batch(
        &self,
        graph: &KnowledgeGraph,
        draft: &GenerationDraft,
        matches: &DraftMatches,
        query: &str,
        vector: Vec<f32>,
    ) -> CommitBatch {
        let allocator = self.kb.allocator();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            .to_string();
        let provenance = |node: Node| {
            node.with_meta(META_SOURCE, AUTO_SOURCE)
                .with_meta(META_CREATED_AT, created_at.clone())
                .with_meta(META_QUERY, query.trim())
        };

        let mut batch = CommitBatch::new();

        let scenario_id = allocator.allocate(NodeKind::Scenario, graph, &batch);
        batch.nodes.push(provenance(Node::new(
            scenario_id.clone(),
            NodeKind::Scenario,
            draft.scenario.clone(),
        )));
        batch.vectors.push((scenario_id.clone(), vector));

        // Principles, reused by exact text, then by similarity.
        let mut principle_ids: Vec<NodeId> = Vec::new();
        for (i, text) in draft.principles.iter().enumerate() {
            let similar = || {
                matches.principle(i).map(|(id, score)| {
                    tracing::debug!(principle = %id, score, "reusing similar principle");
                    id.clone()
                })
            };
            let id = match find_text(graph, &batch, NodeKind::Principle, text).or_else(similar) {
                Some(id) => id,
                None => {
                    let id = allocator.allocate(NodeKind::Principle, graph, &batch);
                    batch
                        .nodes
                        .push(provenance(Node::new(id.clone(), NodeKind::Principle, text.clone())));
                    id
                }
            };
            batch
                .edges
                .push(Edge::new(scenario_id.clone(), id.clone(), EdgeKind::Supports));
            principle_ids.push(id);
        }

        // Explains edges. Without links, every principle explains every drafted article.
        let mut explains: Vec<(usize, usize)> = Vec::new();
        let mut by_number: Vec<(usize, NodeId)> = Vec::new();
        if draft.links.is_empty() {
            for p in 0..principle_ids.len() {
                for a in 0..draft.articles.len() {
                    explains.push((p, a));
                }
            }
        } else {
            for (position, line) in draft.links.iter().enumerate() {
                let (principle, refs) = parse_link(line, position);
                let Some(p) = principle.checked_sub(1).filter(|p| *p < principle_ids.len()) else {
                    tracing::debug!(%line, "link names an unknown principle");
                    continue;
                };
                for reference in refs {
                    if let Some(a) = draft_article_by_number(draft, &reference) {
                        explains.push((p, a));
                    } else if let Some(existing) = graph.find_article_by_number(&reference) {
                        by_number.push((p, existing.clone()));
                    } else if let Some(a) = reference
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .filter(|a| *a < draft.articles.len())
                    {
                        explains.push((p, a));
                    } else {
                        tracing::debug!(%line, %reference, "link names an unknown article");
                    }
                }
            }
        }

        // Drafted articles reached by a link, reused by number, exact text, then similarity.
        let mut article_ids: Vec<Option<NodeId>> = vec![None; draft.articles.len()];
        for &(_, a) in &explains {
            if article_ids[a].is_some() {
                continue;
            }
            let text = &draft.articles[a];
            let number = citation::article_number(text);
            let similar = || {
                let (id, score) = matches.article(a)?;
                // A numbered draft never stands for an article cited under another number.
                let other_number = graph
                    .node(id)
                    .is_some_and(|n| n.metadata.contains_key(META_NUMBER));
                if number.is_some() && other_number {
                    return None;
                }
                tracing::debug!(article = %id, score, "reusing similar article");
                Some(id.clone())
            };
            let reused = number
                .as_deref()
                .and_then(|n| graph.find_article_by_number(n).cloned())
                .or_else(|| find_text(graph, &batch, NodeKind::Article, text))
                .or_else(similar);
            let id = match reused {
                Some(id) => id,
                None => {
                    let id = allocator.allocate(NodeKind::Article, graph, &batch);
                    let mut node = provenance(Node::new(id.clone(), NodeKind::Article, text.clone()));
                    if let Some(n) = number {
                        node = node
                            .with_meta(META_CITATION, format!("Article {n}"))
                            .with_meta(META_NUMBER, n);
                    }
                    batch.nodes.push(node);
                    id
                }
            };
            article_ids[a] = Some(id);
        }

        for (p, a) in explains {
            if let Some(article) = &article_ids[a] {
                batch.edges.push(Edge::new(
                    principle_ids[p].clone(),
                    article.clone(),
                    EdgeKind::Explains,
                ));
            }
        }
        for (p, article) in by_number {
            batch
                .edges
                .push(Edge::new(principle_ids[p].clone(), article, EdgeKind::Explains));
        }

        batch.allocator_next = Some(allocator.peek_next());
        batch
    }
}

/// An existing or already drafted node of `kind` with the same canonical text.
fn find_text(graph: &KnowledgeGraph, batch: &CommitBatch, kind: NodeKind, text: &str) -> Option<NodeId> {
    if let Some(id) = graph.find_by_text(kind, text) {
        return Some(id.clone());
    }
    let wanted = crate::graph::canonical_text(text);
    batch
        .nodes
        .iter()
        .find(|n| n.kind == kind && n.canonical_text() == wanted)
        .map(|n| n.id.clone())
}

/// Position of the drafted article whose citation number is `number`.
fn draft_article_by_number(draft: &GenerationDraft, number: &str) -> Option<usize> {
    draft
        .articles
        .iter()
        .position(|text| citation::article_number(text).as_deref() == Some(number))
}

impl std::fmt::Debug for AutoLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLinker")
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

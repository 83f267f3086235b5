//! Answer composer: a fixed-template answer from a context bundle.
//!
//! Principle and article texts are simplified concurrently. A failed or late
//! simplification falls back to the raw text of that item; citations the
//! simplifier dropped are re-appended verbatim.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::citation::{extract_citations, restore_citations};
use crate::error::UpstreamStage;
use crate::graph::Node;
use crate::graph::traverse::ContextBundle;
use crate::provider::simplify::PlainSimplifier;
use crate::provider::{SimplificationProvider, bounded};

const HEADING: &str = "LEGAL GUIDANCE";
const ADVICE: &str = "This information is based on the Indian legal framework. \
    For specific legal advice, please consult a qualified lawyer. \
    Laws may vary by state and specific circumstances.";
const SHORT_PRINCIPLE_CHARS: usize = 150;

/// The composed answer and how its items were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedAnswer {
    pub text: String,
    /// Items rewritten by the simplification provider.
    pub simplified: usize,
    /// Items shown as raw text because simplification failed or timed out.
    pub fallbacks: usize,
}

/// Heading of an article: its verbatim citation.
pub fn article_heading(article: &Node) -> String {
    article
        .citation()
        .or_else(|| extract_citations(&article.text).into_iter().next())
        .unwrap_or_else(|| format!("Article {}", article.id))
}

fn situation(scenario: &Node) -> String {
    format!("Your situation:\n{} [{}]", scenario.text.trim(), scenario.id)
}

/// Renders context bundles as user-facing answers.
pub struct AnswerComposer {
    simplifier: Arc<dyn SimplificationProvider>,
}

impl AnswerComposer {
    pub fn new(simplifier: Arc<dyn SimplificationProvider>) -> Self {
        Self { simplifier }
    }

    /// Compose the full answer for `query` from `bundle`.
    pub async fn compose(&self, query: &str, bundle: &ContextBundle, timeout: Duration) -> ComposedAnswer {
        let items: Vec<&Node> = bundle.principles.iter().chain(&bundle.articles).collect();
        let (texts, simplified, fallbacks) = self.simplify_all(&items, timeout).await;
        let (principle_texts, article_texts) = texts.split_at(bundle.principles.len());

        let mut sections = vec![
            HEADING.to_string(),
            format!("Your question:\n{}", query.trim()),
            situation(&bundle.scenario),
        ];

        if !principle_texts.is_empty() {
            let lines: Vec<String> = principle_texts.iter().map(|t| format!("• {t}")).collect();
            sections.push(format!("Relevant legal principles:\n{}", lines.join("\n")));
        }

        if !article_texts.is_empty() {
            let entries: Vec<String> = bundle
                .articles
                .iter()
                .zip(article_texts)
                .map(|(article, text)| format!("{}\n   {text}", article_heading(article)))
                .collect();
            sections.push(format!(
                "Constitutional/legal articles:\n{}",
                entries.join("\n\n")
            ));
        }

        let found = match (bundle.principles.len(), bundle.articles.len()) {
            (0, 0) => String::new(),
            (p, 0) => format!("Found {p} relevant legal principle(s) that apply to your situation. "),
            (p, a) => format!(
                "Found {p} relevant legal principle(s) and {a} constitutional/legal article(s) \
                 that apply to your situation. "
            ),
        };
        sections.push(format!("Summary:\n{found}{ADVICE}"));

        ComposedAnswer {
            text: sections.join("\n\n"),
            simplified,
            fallbacks,
        }
    }

    /// Degraded answer for a scenario with no linked principles or articles.
    pub fn compose_without_context(scenario: &Node) -> String {
        [
            HEADING.to_string(),
            situation(scenario),
            format!(
                "Summary:\nNo legal principles or articles are linked to this situation yet. {ADVICE}"
            ),
        ]
        .join("\n\n")
    }

    /// One-line summary: key principle, main article, advice.
    pub fn short_answer(bundle: &ContextBundle) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(principle) = bundle.principles.first() {
            let clean = principle.text.split_whitespace().collect::<Vec<_>>().join(" ");
            let clipped = if clean.chars().count() > SHORT_PRINCIPLE_CHARS {
                let head: String = clean.chars().take(SHORT_PRINCIPLE_CHARS).collect();
                format!("{}...", head.trim_end())
            } else {
                clean
            };
            parts.push(format!("Key principle: {clipped}"));
        }
        if let Some(article) = bundle.articles.first() {
            parts.push(format!("Relevant law: {}", article_heading(article)));
        }
        if parts.is_empty() {
            parts.push("No principles or articles are linked to this situation yet.".into());
        }
        parts.push("Consult a lawyer for specific advice.".into());
        parts.join(" | ")
    }

    /// Simplify every item concurrently; results keep the input order.
    async fn simplify_all(&self, items: &[&Node], timeout: Duration) -> (Vec<String>, usize, usize) {
        let mut tasks = JoinSet::new();
        for (i, node) in items.iter().enumerate() {
            let simplifier = Arc::clone(&self.simplifier);
            let raw = node.text.clone();
            tasks.spawn(async move {
                let outcome = bounded(UpstreamStage::Simplification, timeout, simplifier.simplify(&raw)).await;
                (i, outcome)
            });
        }

        let mut out: Vec<Option<String>> = vec![None; items.len()];
        let mut simplified = 0;
        while let Some(joined) = tasks.join_next().await {
            let Ok((i, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    out[i] = Some(restore_citations(&items[i].text, text.trim()));
                    simplified += 1;
                }
                Ok(Ok(_)) => tracing::warn!(node = %items[i].id, "simplifier returned empty text"),
                Ok(Err(e)) => tracing::warn!(node = %items[i].id, error = %e, "simplification failed"),
                Err(_) => {} // timeout already logged
            }
        }

        let mut fallbacks = 0;
        let texts: Vec<String> = out
            .into_iter()
            .zip(items)
            .map(|(text, node)| {
                text.unwrap_or_else(|| {
                    fallbacks += 1;
                    PlainSimplifier::clean(&node.text)
                })
            })
            .collect();
        (texts, simplified, fallbacks)
    }
}

impl std::fmt::Debug for AnswerComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerComposer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{META_NUMBER, NodeId, NodeKind};
    use crate::provider::CannedGenerator;

    const T: Duration = Duration::from_secs(1);

    fn id(raw: &str) -> NodeId {
        NodeId::new(raw).unwrap()
    }

    fn bundle() -> ContextBundle {
        ContextBundle {
            scenario: Node::new(id("S1"), NodeKind::Scenario, "Police searched my house without a warrant"),
            principles: vec![Node::new(
                id("P1"),
                NodeKind::Principle,
                "Right to privacy is protected under Article 21.",
            )],
            articles: vec![Node::new(
                id("A1"),
                NodeKind::Article,
                "No person shall be deprived of his life or personal liberty except according to procedure established by law.",
            )
            .with_meta(META_NUMBER, "21")],
            related_scenarios: vec![],
        }
    }

    #[tokio::test]
    async fn template_lists_everything_in_order() {
        let composer = AnswerComposer::new(Arc::new(PlainSimplifier));
        let answer = composer.compose("Can police search my house?", &bundle(), T).await;

        let text = &answer.text;
        assert!(text.starts_with("LEGAL GUIDANCE"));
        assert!(text.contains("Police searched my house without a warrant [S1]"));
        let p = text.find("Right to privacy").unwrap();
        let a = text.find("\nArticle 21\n").unwrap();
        let s = text.find("Summary:").unwrap();
        assert!(p < a && a < s);
        assert!(text.contains("consult a qualified lawyer"));
        assert_eq!(answer.simplified, 2);
        assert_eq!(answer.fallbacks, 0);
    }

    #[tokio::test]
    async fn dropped_citations_are_restored() {
        let composer = AnswerComposer::new(Arc::new(CannedGenerator::new("You have a right to privacy.")));
        let answer = composer.compose("q", &bundle(), T).await;
        assert!(answer.text.contains("• You have a right to privacy. [Article 21]"));
    }

    #[tokio::test]
    async fn failed_or_slow_simplification_falls_back_to_raw_text() {
        let failing = AnswerComposer::new(Arc::new(CannedGenerator::failing("boom")));
        let answer = failing.compose("q", &bundle(), T).await;
        assert_eq!(answer.fallbacks, 2);
        assert!(answer.text.contains("Right to privacy is protected under Article 21."));

        let slow = AnswerComposer::new(Arc::new(
            CannedGenerator::new("simple").with_delay(Duration::from_millis(500)),
        ));
        let answer = slow.compose("q", &bundle(), Duration::from_millis(20)).await;
        assert_eq!(answer.simplified, 0);
        assert_eq!(answer.fallbacks, 2);
        assert!(!answer.text.contains("simple\n"));
    }

    #[test]
    fn degraded_answer_names_only_the_scenario() {
        let text = AnswerComposer::compose_without_context(&bundle().scenario);
        assert!(text.contains("[S1]"));
        assert!(!text.contains("Relevant legal principles"));
    }

    #[test]
    fn short_answer_is_one_line() {
        let mut b = bundle();
        b.principles[0].text = "x ".repeat(200);
        let short = AnswerComposer::short_answer(&b);
        assert!(!short.contains('\n'));
        assert!(short.contains("x... | Relevant law: Article 21"));
        assert!(short.ends_with("Consult a lawyer for specific advice."));
    }
}

//! End-to-end tests for the lexgraph engine.
//!
//! These tests drive the full pipeline (matching, traversal, auto-linking and
//! composition) through the public `Engine` API with deterministic providers.

use std::sync::Arc;
use std::time::Duration;

use lexgraph::bootstrap::GraphSeed;
use lexgraph::engine::{Engine, EngineConfig, Providers, ResolutionMethod};
use lexgraph::matcher::Threshold;
use lexgraph::provider::{CannedGenerator, PlainSimplifier, TableEmbedder};

const SEED: &str = r#"{
    "nodes": [
        {"id": "S1", "kind": "scenario", "text": "Police searched my house without a warrant"},
        {"id": "S2", "kind": "scenario", "text": "My landlord cut off the water supply"},
        {"id": "P1", "kind": "principle", "text": "Right to privacy is protected under Article 21."},
        {"id": "A1", "kind": "article",
         "text": "No person shall be deprived of his life or personal liberty except according to procedure established by law.",
         "metadata": {"number": "21"}}
    ],
    "edges": [
        {"source": "S1", "target": "P1", "kind": "supports"},
        {"source": "P1", "target": "A1", "kind": "explains"}
    ]
}"#;

const WARRANT_QUESTION: &str = "Can police search my house without a warrant?";
const DRONE_QUESTION: &str = "Can my neighbour fly a drone over my garden?";

const DRONE_DRAFT: &str = r#"{
  "scenario": {"example": "A drone hovers over a private garden"},
  "principles": ["Aerial privacy: flights over private property can intrude on privacy."],
  "articles": ["Article 21: Protection of life and personal liberty"],
  "links": ["Principle 1 -> Article 21"]
}"#;

const T: Duration = Duration::from_secs(5);

fn embedder() -> TableEmbedder {
    TableEmbedder::new("table-v1", 5)
        .with("Police searched my house without a warrant", vec![1.0, 0.0, 0.0, 0.0, 0.0])
        .with("My landlord cut off the water supply", vec![0.0, 1.0, 0.0, 0.0, 0.0])
        .with(WARRANT_QUESTION, vec![0.95, 0.05, 0.0, 0.0, 0.0])
        .with(DRONE_QUESTION, vec![0.0, 0.0, 0.95, 0.05, 0.0])
        .with("A drone hovers over a private garden", vec![0.0, 0.0, 1.0, 0.0, 0.0])
        .with("Officers entered my home with no warrant", vec![0.9, 0.1, 0.0, 0.0, 0.0])
        .with("boundary question", vec![3.0, 2.0, 1.0, 1.0, 1.0])
}

fn engine_with(embedder: TableEmbedder, generator: Arc<CannedGenerator>, config: EngineConfig) -> Engine {
    let providers = Providers {
        embedder: Arc::new(embedder),
        generator,
        simplifier: Arc::new(PlainSimplifier),
    };
    Engine::new(config, providers).unwrap()
}

async fn seeded(generator: Arc<CannedGenerator>) -> Engine {
    let engine = engine_with(embedder(), generator, EngineConfig::default());
    engine
        .bootstrap(&GraphSeed::from_json_str(SEED).unwrap())
        .await
        .unwrap();
    engine
}

#[tokio::test]
async fn matched_question_is_answered_from_the_graph() {
    let generator = Arc::new(CannedGenerator::failing("must not be called"));
    let engine = seeded(generator.clone()).await;

    let resolution = engine.resolve(WARRANT_QUESTION).await.unwrap();
    assert_eq!(resolution.scenario_id.as_str(), "S1");
    let ResolutionMethod::GraphMatch { score } = resolution.method else {
        panic!("expected a graph match, got {:?}", resolution.method);
    };
    assert!(score >= 0.75);
    assert_eq!(resolution.context_summary.score, Some(score));
    assert_eq!(resolution.context_summary.principles, 1);
    assert_eq!(resolution.context_summary.articles, 1);

    let answer = &resolution.answer;
    assert!(answer.contains("Right to privacy is protected under Article 21."));
    assert!(answer.contains("\nArticle 21\n"));
    assert!(answer.contains("[S1]"));
    assert!(resolution.short_answer.contains("Relevant law: Article 21"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn unmatched_question_is_auto_linked() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT));
    let engine = seeded(generator.clone()).await;

    let resolution = engine.resolve(DRONE_QUESTION).await.unwrap();
    assert_eq!(resolution.method, ResolutionMethod::Generated);
    assert_eq!(resolution.scenario_id.as_str(), "scenario-auto-0");
    assert!(resolution.answer.contains("Aerial privacy"));
    // The drafted Article 21 is the existing A1.
    assert!(resolution.answer.contains("\nArticle 21\n"));

    let info = engine.info().unwrap();
    assert_eq!(info.scenarios, 3);
    assert_eq!(info.principles, 2);
    assert_eq!(info.articles, 1);
    assert_eq!(info.auto_generated, 2);
    assert_eq!(info.vectors, 3);
    engine.check_consistency().unwrap();

    let bundle = engine.expand("scenario-auto-0").unwrap();
    assert_eq!(bundle.articles[0].id.as_str(), "A1");
}

#[tokio::test]
async fn repeated_question_resolves_to_the_same_scenario() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT));
    let engine = seeded(generator.clone()).await;

    let first = engine.resolve(DRONE_QUESTION).await.unwrap();
    let nodes = engine.info().unwrap().nodes();

    let second = engine.resolve(DRONE_QUESTION).await.unwrap();
    assert_eq!(second.scenario_id, first.scenario_id);
    assert!(matches!(second.method, ResolutionMethod::GraphMatch { .. }));
    assert_eq!(engine.info().unwrap().nodes(), nodes);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn threshold_boundary_is_inclusive() {
    // cos([3,2,1,1,1], e1) is exactly 0.75.
    let at = seeded(Arc::new(CannedGenerator::failing("unused"))).await;
    let resolution = at.resolve("boundary question").await.unwrap();
    assert_eq!(resolution.scenario_id.as_str(), "S1");
    assert_eq!(resolution.method, ResolutionMethod::GraphMatch { score: 0.75 });

    let config = EngineConfig {
        threshold: Threshold::new(f32::from_bits(0.75f32.to_bits() + 1)).unwrap(),
        ..EngineConfig::default()
    };
    let above = engine_with(embedder(), Arc::new(CannedGenerator::failing("offline")), config);
    above
        .bootstrap(&GraphSeed::from_json_str(SEED).unwrap())
        .await
        .unwrap();
    let err = above.resolve("boundary question").await.unwrap_err();
    assert_eq!(err.code(), "GENERATION_FAILED");
}

#[tokio::test]
async fn similar_draft_reuses_existing_scenario() {
    let generator = Arc::new(CannedGenerator::new(
        r#"{"scenario": {"example": "Officers entered my home with no warrant"},
            "principles": ["Searches need a warrant."]}"#,
    ));
    let engine = seeded(generator).await;
    let before = engine.info().unwrap();

    let resolution = engine.resolve_forced(DRONE_QUESTION, T).await.unwrap();
    assert_eq!(resolution.scenario_id.as_str(), "S1");
    let ResolutionMethod::Reused { score: Some(score) } = resolution.method else {
        panic!("expected a similarity reuse, got {:?}", resolution.method);
    };
    assert!(score >= 0.75);
    assert_eq!(engine.info().unwrap(), before);
}

#[tokio::test]
async fn forced_generation_skips_matching() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT));
    let engine = seeded(generator.clone()).await;

    let resolution = engine.resolve_forced(WARRANT_QUESTION, T).await.unwrap();
    assert_eq!(resolution.method, ResolutionMethod::Generated);
    assert_ne!(resolution.scenario_id.as_str(), "S1");
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn scenario_without_links_gets_degraded_answer() {
    let engine = seeded(Arc::new(CannedGenerator::failing("unused"))).await;
    let candidates = engine.match_query("My landlord cut off the water supply").await.unwrap();
    assert_eq!(candidates[0].scenario_id.as_str(), "S2");
    assert_eq!(candidates[0].score, 1.0);

    let resolution = engine.resolve("My landlord cut off the water supply").await.unwrap();
    assert_eq!(resolution.degraded, Some("NO_CONTEXT_FOUND"));
    assert!(resolution.answer.contains("[S2]"));
    assert!(!resolution.answer.contains("Relevant legal principles"));
}

#[tokio::test]
async fn generated_scenario_without_principles_gets_degraded_answer() {
    const QUESTION: &str = "Can I keep a peacock at home?";
    let generator = Arc::new(CannedGenerator::new(
        r#"{"scenario": {"example": "A resident keeps a peacock as a pet"}}"#,
    ));
    let embedder = embedder()
        .with(QUESTION, vec![0.0, 0.0, 0.0, 0.1, 1.0])
        .with("A resident keeps a peacock as a pet", vec![0.0, 0.0, 0.0, 0.0, 1.0]);
    let engine = engine_with(embedder, generator.clone(), EngineConfig::default());
    engine
        .bootstrap(&GraphSeed::from_json_str(SEED).unwrap())
        .await
        .unwrap();

    let resolution = engine.resolve(QUESTION).await.unwrap();
    assert_eq!(resolution.method, ResolutionMethod::Generated);
    assert_eq!(resolution.scenario_id.as_str(), "scenario-auto-0");
    assert_eq!(resolution.degraded, Some("NO_CONTEXT_FOUND"));
    assert!(resolution.answer.contains("[scenario-auto-0]"));
    assert!(!resolution.answer.contains("[S1]"));
    assert_eq!(resolution.context_summary.principles, 0);
    assert_eq!(resolution.context_summary.articles, 0);

    let info = engine.info().unwrap();
    assert_eq!(info.scenarios, 3);
    assert_eq!(info.auto_generated, 1);
    assert_eq!(generator.calls(), 1);
    engine.check_consistency().unwrap();
}

#[tokio::test]
async fn related_cycles_terminate() {
    let engine = engine_with(
        embedder(),
        Arc::new(CannedGenerator::failing("unused")),
        EngineConfig {
            related_depth: 5,
            ..EngineConfig::default()
        },
    );
    let mut seed = GraphSeed::from_json_str(SEED).unwrap();
    let extra = GraphSeed::from_json_str(
        r#"{"nodes": [],
            "edges": [
                {"source": "S1", "target": "S2", "kind": "related"},
                {"source": "S2", "target": "S1", "kind": "related"},
                {"source": "S1", "target": "S1", "kind": "related"}
            ]}"#,
    )
    .unwrap();
    seed.edges.extend(extra.edges);
    engine.bootstrap(&seed).await.unwrap();

    let bundle = engine.expand("S1").unwrap();
    let related: Vec<&str> = bundle.related_scenarios.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(related, vec!["S2"]);
    assert_eq!(bundle.principles.len(), 1);
}

#[tokio::test]
async fn concurrent_resolves_agree() {
    let engine = Arc::new(seeded(Arc::new(CannedGenerator::failing("unused"))).await);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.resolve(WARRANT_QUESTION).await });
    }
    while let Some(joined) = tasks.join_next().await {
        let resolution = joined.unwrap().unwrap();
        assert_eq!(resolution.scenario_id.as_str(), "S1");
    }
    engine.check_consistency().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_auto_links_create_one_scenario() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT).with_delay(Duration::from_millis(50)));
    let engine = Arc::new(seeded(generator).await);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.resolve(DRONE_QUESTION).await });
    }

    let mut ids = Vec::new();
    let mut created = 0;
    while let Some(joined) = tasks.join_next().await {
        let resolution = joined.unwrap().unwrap();
        if resolution.method == ResolutionMethod::Generated {
            created += 1;
        }
        ids.push(resolution.scenario_id);
    }

    assert_eq!(created, 1);
    assert!(ids.iter().all(|id| id == &ids[0]));
    let info = engine.info().unwrap();
    assert_eq!(info.scenarios, 3);
    assert_eq!(info.principles, 2);
    engine.check_consistency().unwrap();
}

#[tokio::test]
async fn slow_providers_time_out() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT).with_delay(Duration::from_millis(500)));
    let engine = seeded(generator).await;

    let err = engine
        .resolve_with_timeout(DRONE_QUESTION, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPSTREAM_TIMEOUT");
    assert!(err.is_retryable());
    assert!(err.degraded_answer().contains("UPSTREAM_TIMEOUT"));

    let slow_embedder = engine_with(
        embedder().with_delay(Duration::from_millis(500)),
        Arc::new(CannedGenerator::failing("unused")),
        EngineConfig::default(),
    );
    let err = slow_embedder
        .resolve_with_timeout(WARRANT_QUESTION, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "UPSTREAM_TIMEOUT");
}

#[tokio::test]
async fn cancelled_resolve_leaves_graph_untouched() {
    let generator = Arc::new(CannedGenerator::new(DRONE_DRAFT).with_delay(Duration::from_millis(300)));
    let engine = seeded(generator.clone()).await;
    let before = engine.export().unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(50), engine.resolve(DRONE_QUESTION)).await;
    assert!(cancelled.is_err());
    assert_eq!(generator.calls(), 1);

    assert_eq!(engine.export().unwrap(), before);
    engine.check_consistency().unwrap();

    // The engine keeps working after the cancellation.
    let resolution = engine.resolve(DRONE_QUESTION).await.unwrap();
    assert_eq!(resolution.method, ResolutionMethod::Generated);
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let engine = seeded(Arc::new(CannedGenerator::new(DRONE_DRAFT))).await;
    let err = engine.resolve("   ").await.unwrap_err();
    assert_eq!(err.code(), "EMBEDDING_UNAVAILABLE");
    let err = engine.resolve_forced("", T).await.unwrap_err();
    assert_eq!(err.code(), "EMBEDDING_UNAVAILABLE");
}

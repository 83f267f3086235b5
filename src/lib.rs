// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # lexgraph
//!
//! Knowledge-graph query resolution for legal questions. A question is matched
//! against a graph of legal scenarios, principles and statutory articles; the
//! matched scenario's context is collected by traversal and rendered as a plain
//! language answer. When nothing matches, new graph content is generated,
//! deduplicated and committed atomically.
//!
//! ## Architecture
//!
//! - **Providers** (`provider`): embedding, generation and simplification traits
//!   with offline and Ollama implementations
//! - **Vector index** (`vector`): one vector per scenario, exact or HNSW search
//! - **Knowledge graph** (`graph`): petgraph-backed typed nodes and edges, context traversal
//! - **Knowledge base** (`knowledge`): graph + index in lock-step, atomic commits
//! - **Durable store** (`store`): redb mirror of every commit
//! - **Matcher, auto-linker, composer** (`matcher`, `linker`, `compose`)
//! - **Engine** (`engine`): the facade tying everything together
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lexgraph::bootstrap::GraphSeed;
//! use lexgraph::engine::{Engine, EngineConfig, Providers};
//! use lexgraph::provider::{CannedGenerator, HashingEmbedder, PlainSimplifier};
//!
//! # async fn run() -> lexgraph::error::LexResult<()> {
//! let providers = Providers {
//!     embedder: Arc::new(HashingEmbedder::new(256)),
//!     generator: Arc::new(CannedGenerator::failing("offline")),
//!     simplifier: Arc::new(PlainSimplifier),
//! };
//! let engine = Engine::new(EngineConfig::default(), providers)?;
//! engine.bootstrap(&GraphSeed::from_path("seed.json".as_ref())?).await?;
//! let resolution = engine.resolve("Can the police search my house without a warrant?").await?;
//! println!("{}", resolution.answer);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod citation;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod knowledge;
pub mod linker;
pub mod matcher;
pub mod provider;
pub mod store;
pub mod vector;

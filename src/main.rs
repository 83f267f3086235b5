//! lexgraph CLI: legal question answering over a knowledge graph.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use lexgraph::bootstrap::GraphSeed;
use lexgraph::compose::{AnswerComposer, article_heading};
use lexgraph::config::{ProviderKind, Settings};
use lexgraph::engine::{Engine, Resolution};
use lexgraph::provider::OllamaClient;

#[derive(Parser)]
#[command(name = "lexgraph", version, about = "Legal knowledge-graph question answering")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Settings file (default: $XDG_CONFIG_HOME/lexgraph/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Inclusive match threshold on the cosine scale [-1, 1].
    #[arg(long, global = true)]
    threshold: Option<f32>,

    /// Number of candidate scenarios considered.
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Related-edge hops followed during expansion.
    #[arg(long, global = true)]
    related_depth: Option<usize>,

    /// Timeout for every provider call, in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Provider family.
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load scenarios, principles, articles and edges from a JSON seed.
    Bootstrap {
        /// Path to the JSON seed file.
        #[arg(long)]
        file: PathBuf,
    },

    /// Answer a legal question.
    Ask {
        question: String,

        /// Skip matching and generate new graph content.
        #[arg(long)]
        force_generate: bool,

        /// Print only the one-line summary.
        #[arg(long)]
        short: bool,

        /// Print the full resolution as JSON.
        #[arg(long)]
        json: bool,

        /// Print method, score, context sizes and timing.
        #[arg(long)]
        debug: bool,
    },

    /// Show the closest scenarios for a question.
    Match { question: String },

    /// Show the context bundle of a scenario.
    Expand { scenario_id: String },

    /// Show graph statistics.
    Info,

    /// Verify that every scenario has exactly one vector.
    Check,

    /// Write the whole graph as a bootstrap seed.
    Export {
        /// Output file (stdout if omitted).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::resolve(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            settings.engine.data_dir = Some(dir.clone());
        }
        if let Some(t) = self.threshold {
            settings.engine.threshold = t;
        }
        if let Some(k) = self.top_k {
            settings.engine.top_k = k;
        }
        if let Some(d) = self.related_depth {
            settings.engine.related_depth = d;
        }
        if let Some(s) = self.timeout_secs {
            settings.engine.timeout_secs = s;
        }
        if let Some(p) = self.provider {
            settings.provider.kind = p;
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    if settings.provider.kind == ProviderKind::Ollama {
        let client = OllamaClient::new(settings.provider.ollama.clone());
        let url = client.config().base_url.clone();
        let reachable = tokio::task::spawn_blocking(move || client.probe())
            .await
            .unwrap_or(false);
        if !reachable {
            tracing::warn!(%url, "Ollama is not reachable; provider calls will fail");
        }
    }
    let engine = Engine::new(settings.to_engine_config()?, settings.providers()?)?;

    match cli.command {
        Commands::Bootstrap { file } => {
            let seed = GraphSeed::from_path(&file)?;
            let report = engine.bootstrap(&seed).await?;
            println!(
                "Bootstrapped {} nodes, {} edges, {} vectors from {} ({} already present)",
                report.committed.nodes,
                report.committed.edges,
                report.committed.vectors,
                file.display(),
                report.unchanged
            );
            println!("{}", engine.info()?);
        }

        Commands::Ask {
            question,
            force_generate,
            short,
            json,
            debug,
        } => {
            let timeout = engine.config().upstream_timeout;
            let started = Instant::now();
            let result = if force_generate {
                engine.resolve_forced(&question, timeout).await
            } else {
                engine.resolve_with_timeout(&question, timeout).await
            };

            let resolution = match result {
                Ok(r) => r,
                Err(e) if e.is_retryable() => {
                    println!("{}", e.degraded_answer());
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&resolution).into_diagnostic()?);
            } else if short {
                println!("{}", resolution.short_answer);
            } else {
                println!("{}", resolution.answer);
            }
            if debug {
                print_debug(&resolution, started.elapsed());
            }
        }

        Commands::Match { question } => {
            let candidates = engine.match_query(&question).await?;
            if candidates.is_empty() {
                println!("No scenarios indexed.");
            } else {
                let threshold = engine.config().threshold;
                println!("Closest scenarios (threshold {threshold}):");
                for (i, c) in candidates.iter().enumerate() {
                    let mark = if threshold.accepts(c.score) { "*" } else { " " };
                    println!("  {mark} {}. {} (score: {:.4})", i + 1, c.scenario_id, c.score);
                }
            }
        }

        Commands::Expand { scenario_id } => {
            let bundle = engine.expand(&scenario_id)?;
            println!("Scenario {}: {}", bundle.scenario.id, bundle.scenario.text);
            println!("\nPrinciples ({}):", bundle.principles.len());
            for p in &bundle.principles {
                println!("  [{}] {}", p.id, p.text);
            }
            println!("\nArticles ({}):", bundle.articles.len());
            for a in &bundle.articles {
                println!("  [{}] {}: {}", a.id, article_heading(a), a.text);
            }
            if !bundle.related_scenarios.is_empty() {
                println!("\nRelated scenarios ({}):", bundle.related_scenarios.len());
                for s in &bundle.related_scenarios {
                    println!("  [{}] {}", s.id, s.text);
                }
            }
            println!("\n{}", AnswerComposer::short_answer(&bundle));
        }

        Commands::Info => {
            println!("{}", engine.info()?);
        }

        Commands::Check => {
            let report = engine.check_consistency()?;
            println!(
                "OK: {} nodes, {} edges, {} scenarios, {} vectors",
                report.nodes, report.edges, report.scenarios, report.vectors
            );
        }

        Commands::Export { out } => {
            let json = engine.export()?.to_json_pretty()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json).into_diagnostic()?;
                    println!("Exported graph to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

fn print_debug(resolution: &Resolution, elapsed: Duration) {
    let summary = &resolution.context_summary;
    eprintln!("--- debug ---");
    eprintln!("  method:      {}", resolution.method);
    eprintln!("  scenario:    {}", summary.scenario_id);
    if let Some(score) = summary.score {
        eprintln!("  score:       {score:.4}");
    }
    eprintln!("  principles:  {}", summary.principles);
    eprintln!("  articles:    {}", summary.articles);
    eprintln!("  related:     {}", summary.related_scenarios);
    if let Some(code) = resolution.degraded {
        eprintln!("  degraded:    {code}");
    }
    eprintln!("  elapsed:     {} ms", elapsed.as_millis());
}

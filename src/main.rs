//! # Docent CLI (`docent`)
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent segment <file>` | Show how a document is divided into sections |
//! | `docent rank <file> "<query>"` | Rank sections against a query |
//! | `docent context <file> "<query>"` | Print the context block a query would send |
//! | `docent ask <file> "<question>"...` | Answer questions about a document |
//! | `docent chat [--file <file>]` | Interactive session |
//! | `docent serve` | Start the HTTP server |
//!
//! `segment`, `rank`, and `context` never call the model.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use docent::config::{self, Config};
use docent::engine::Engine;
use docent::extract::extract_text;
use docent::orchestrator::QueryOrchestrator;
use docent::server;
use docent::store::FsObjectStore;
use docent_core::{ContextAssembler, RelevanceRetriever, Segmenter};

/// Docent: answer questions about long documents with budgeted context.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: answer questions about long documents with budgeted context",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docent.toml` when it exists, otherwise built-in
    /// defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment a document and list its sections.
    Segment {
        /// Document to read (.pdf, .docx, .txt, .md, ...).
        file: PathBuf,
        /// Print the processed document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank a document's sections against a query.
    Rank {
        file: PathBuf,
        query: String,
        /// Maximum sections to show.
        #[arg(long, default_value = "5")]
        limit: usize,
        /// Print scores as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the context block that would accompany a question.
    Context {
        file: PathBuf,
        query: String,
        /// Sections to select (defaults to `[retrieval].max_sections`).
        #[arg(long)]
        limit: Option<usize>,
        /// Token budget (defaults to `[context].budget_tokens`).
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Answer questions about a document, in order, in one session.
    Ask {
        file: PathBuf,
        #[arg(required = true)]
        questions: Vec<String>,
    },

    /// Start an interactive session.
    ///
    /// Lines starting with `/` are commands: `/attach <file>`, `/clear`,
    /// `/stats`, `/debug`, `/quit`.
    Chat {
        /// Document to attach at start.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("docent=info,docent_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Segment { file, json } => run_segment(&cfg, &file, json)?,
        Commands::Rank {
            file,
            query,
            limit,
            json,
        } => run_rank(&cfg, &file, &query, limit, json)?,
        Commands::Context {
            file,
            query,
            limit,
            budget,
        } => run_context(&cfg, &file, &query, limit, budget)?,
        Commands::Ask { file, questions } => run_ask(&cfg, &file, &questions).await?,
        Commands::Chat { file } => run_chat(&cfg, file.as_deref()).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

fn read_document(path: &Path) -> Result<(String, String)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string();
    let text = extract_text(&bytes, &name)?;
    Ok((text, name))
}

fn run_segment(cfg: &Config, path: &Path, json: bool) -> Result<()> {
    let (text, name) = read_document(path)?;
    let document = Segmenter::new((&cfg.segmentation).into()).segment(&text, &name);

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!(
        "{}: {} tokens, {} document",
        document.name, document.token_estimate, document.kind
    );
    if let Some(strategy) = document.strategy {
        println!("strategy: {}", strategy);
    }
    for section in &document.sections {
        println!(
            "{:>3}. {:<48} {:>6} tokens  importance {:.2}",
            section.ordinal + 1,
            section.title,
            section.token_estimate,
            section.importance
        );
    }
    Ok(())
}

fn run_rank(cfg: &Config, path: &Path, query: &str, limit: usize, json: bool) -> Result<()> {
    let (text, name) = read_document(path)?;
    let document = Segmenter::new((&cfg.segmentation).into()).segment(&text, &name);
    let retriever = RelevanceRetriever::new((&cfg.retrieval).into());

    let ranked = retriever.rank(&document.sections, query, limit);
    if json {
        let rows: Vec<serde_json::Value> = ranked
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.section.id,
                    "title": s.section.title,
                    "score": s.score,
                    "keyword_score": s.keyword_score,
                    "concept_score": s.concept_score,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if ranked.is_empty() {
        println!("No sections (document is small and used whole).");
        return Ok(());
    }
    for (i, scored) in ranked.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} (keyword {:.1}, concept {:.1})",
            i + 1,
            scored.score,
            scored.section.title,
            scored.keyword_score,
            scored.concept_score
        );
    }
    Ok(())
}

fn run_context(
    cfg: &Config,
    path: &Path,
    query: &str,
    limit: Option<usize>,
    budget: Option<usize>,
) -> Result<()> {
    let (text, name) = read_document(path)?;
    let document = Segmenter::new((&cfg.segmentation).into()).segment(&text, &name);
    let assembler = ContextAssembler::new((&cfg.context).into());
    let budget = budget.unwrap_or(cfg.context.budget_tokens);

    let context = if document.is_large() {
        let retriever = RelevanceRetriever::new((&cfg.retrieval).into());
        let selected: Vec<_> = retriever
            .rank(&document.sections, query, limit.unwrap_or(cfg.retrieval.max_sections))
            .into_iter()
            .map(|s| s.section)
            .collect();
        assembler.assemble(&document.sections, &selected, budget)
    } else {
        assembler.assemble_whole(&document, budget)
    };

    println!("{}", context.text);
    eprintln!(
        "{} tokens of {} budget, compression {:?}, sections {:?}",
        context.token_estimate, budget, context.compression, context.section_ids
    );
    Ok(())
}

async fn run_ask(cfg: &Config, path: &Path, questions: &[String]) -> Result<()> {
    let engine = Engine::start(cfg)?;
    let orchestrator = engine.orchestrator();
    let session = uuid::Uuid::new_v4().to_string();

    let (text, name) = read_document(path)?;
    orchestrator.process_document(&session, &text, &name).await?;
    for question in questions {
        let answer = orchestrator.process_query(&session, question).await?;
        if questions.len() > 1 {
            println!("Q: {}", question);
        }
        println!("{}", answer.answer);
        eprintln!(
            "{:?} after {} round(s), {} model call(s), ${:.6}\n",
            answer.outcome, answer.rounds, answer.model_calls, answer.cost_usd
        );
    }
    engine.shutdown().await;
    Ok(())
}

async fn run_chat(cfg: &Config, file: Option<&Path>) -> Result<()> {
    let engine = Engine::start(cfg)?;
    let orchestrator = Arc::clone(engine.orchestrator());
    let session = uuid::Uuid::new_v4().to_string();

    if let Some(path) = file {
        attach(&orchestrator, &session, path).await;
    }
    println!("Docent chat. /attach <file>, /clear, /stats, /debug, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit" | "/exit", _) => break,
            ("/attach", path) if !path.trim().is_empty() => {
                attach(&orchestrator, &session, Path::new(path.trim())).await;
            }
            ("/attach", _) => println!("usage: /attach <file>"),
            ("/clear", _) => {
                orchestrator.clear_session(&session);
                println!("Session cleared.");
            }
            ("/stats", _) => println!("{}", serde_json::to_string_pretty(&orchestrator.stats())?),
            ("/debug", _) => match orchestrator.debug_snapshot(&session).await {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("No session state yet."),
            },
            _ => match orchestrator.process_query(&session, line).await {
                Ok(answer) => println!("{}\n", answer.answer),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn attach(orchestrator: &QueryOrchestrator, session: &str, path: &Path) {
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let store = FsObjectStore::new(root);
    let key = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match orchestrator.attach_from_store(session, &store, &key).await {
        Ok(summary) => println!(
            "Attached {} ({} tokens, {} sections{}).",
            summary.name,
            summary.token_estimate,
            summary.sections,
            if summary.from_cache { ", cached" } else { "" }
        ),
        Err(e) => eprintln!("error: {}", e),
    }
}

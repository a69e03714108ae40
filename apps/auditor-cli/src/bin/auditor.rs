use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use auditor_backends::{OllamaChat, SniffingDecoder};
use auditor_core::config::{resolve_with_base, Config, Settings};
use auditor_core::types::{AuditRequest, AuditResult, AuditSubject, Outcome};
use auditor_embed::get_default_embedder;
use auditor_index::{store, PolicyIndexer, Retriever};
use auditor_pipeline::{cancel_pair, Collaborators, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "auditor", version, about = "Policy-grounded compliance auditor for text, documents and images")]
struct Cli {
    /// Index file (overrides `index.index_path`).
    #[arg(long, global = true)]
    index: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse the policy, embed every rule chunk and persist the index.
    Build {
        /// Policy source (overrides `index.policy_path`).
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Show the policy chunks retrieved for a query.
    Query {
        text: String,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        min_similarity: Option<f32>,
    },

    /// Audit one input and print the result as JSON.
    #[command(group(ArgGroup::new("input").required(true).args(["text", "document", "image"])))]
    Audit {
        #[arg(long)]
        text: Option<String>,
        /// Document file (PDF or text) to decode page by page.
        #[arg(long)]
        document: Option<PathBuf>,
        /// Image file to describe before judging.
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "content")]
        subject: SubjectArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SubjectArg {
    UserPrompt,
    ModelOutput,
    Content,
}

impl From<SubjectArg> for AuditSubject {
    fn from(arg: SubjectArg) -> Self {
        match arg {
            SubjectArg::UserPrompt => AuditSubject::UserPrompt,
            SubjectArg::ModelOutput => AuditSubject::ModelOutput,
            SubjectArg::Content => AuditSubject::Content,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {}", e);
        e
    })?;
    let settings = config.settings()?;
    let base = std::env::current_dir()?;
    let index_path = cli
        .index
        .clone()
        .unwrap_or_else(|| resolve_with_base(&base, &settings.index.index_path));

    match cli.cmd {
        Commands::Build { policy } => {
            let policy_path = policy.unwrap_or_else(|| resolve_with_base(&base, &settings.index.policy_path));
            cmd_build(&settings, &policy_path, &index_path).await
        }
        Commands::Query { text, k, min_similarity } => {
            let k = k.unwrap_or(settings.retrieval.k);
            let min_similarity = min_similarity.unwrap_or(settings.retrieval.min_similarity);
            cmd_query(&settings, &index_path, &text, k, min_similarity).await
        }
        Commands::Audit { text, document, image, subject } => {
            let request = match (text, document, image) {
                (Some(text), _, _) => AuditRequest::text(text),
                (_, Some(path), _) => AuditRequest::document(read_payload(&path)?),
                (_, _, Some(path)) => AuditRequest::image(read_payload(&path)?),
                _ => anyhow::bail!("one of --text, --document or --image is required"),
            };
            let result = cmd_audit(&settings, &index_path, request.with_subject(subject.into())).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            std::process::exit(exit_code(&result));
        }
    }
}

async fn cmd_build(settings: &Settings, policy_path: &Path, index_path: &Path) -> anyhow::Result<()> {
    println!("Policy: {}", policy_path.display());
    let embedder = get_default_embedder(settings)?;
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("#>-"),
    );
    let indexer = PolicyIndexer::new(embedder, settings.embedding.timeout()).with_progress(bar);
    let index = indexer.build_from_path(policy_path).await.map_err(|e| {
        let kind = e.kind();
        anyhow::Error::new(e).context(format!("policy build failed ({kind:?})"))
    })?;
    store::save(&index, index_path)?;
    println!(
        "✅ Indexed {} chunks ({}, d={}) into {}",
        index.len(),
        index.meta().provider_id,
        index.meta().dim,
        index_path.display()
    );
    Ok(())
}

async fn cmd_query(settings: &Settings, index_path: &Path, text: &str, k: usize, min_similarity: f32) -> anyhow::Result<()> {
    let index = store::load(index_path)?;
    let retriever = Retriever::new(get_default_embedder(settings)?, settings.embedding.timeout());
    let result = retriever.query(&index, text, k, min_similarity).await?;
    println!("🔍 {} chunk(s) for: \"{}\"", result.len(), text);
    for (i, hit) in result.hits.iter().enumerate() {
        println!(
            "\n  {}. score={:.4}  rule={}  section={}  id={}",
            i + 1,
            hit.score,
            hit.chunk.rule_id,
            hit.chunk.section_title,
            hit.chunk.chunk_id
        );
        println!("     {}", hit.chunk.text.replace('\n', "\n     "));
    }
    Ok(())
}

async fn cmd_audit(settings: &Settings, index_path: &Path, request: AuditRequest) -> anyhow::Result<AuditResult> {
    let index = store::load(index_path)?;
    let collaborators = Collaborators {
        embedder: get_default_embedder(settings)?,
        decoder: Arc::new(SniffingDecoder),
        vision: Arc::new(OllamaChat::new(&settings.ollama.host, &settings.vision.model)?),
        reasoning: Arc::new(OllamaChat::new(&settings.ollama.host, &settings.reasoning.model)?),
    };
    let orchestrator = Orchestrator::new(collaborators, settings);

    let (canceller, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling audit");
            canceller.cancel();
        }
    });
    Ok(orchestrator.audit_with_cancel(&request, &index, &signal).await)
}

fn read_payload(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))
}

/// 0 = PASS, 2 = FAIL, 3 = UNCERTAIN, 4 = classified failure.
fn exit_code(result: &AuditResult) -> i32 {
    match result.outcome() {
        Some(Outcome::Pass) => 0,
        Some(Outcome::Fail) => 2,
        Some(Outcome::Uncertain) => 3,
        None => 4,
    }
}

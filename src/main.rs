//! cite-audit CLI
//!
//! Audits the citations of a .docx paper: reference counts, source download
//! from arXiv, and LLM verification of each citing sentence.

use anyhow::{Context, Result};
use cite_audit::arxiv::ArxivClient;
use cite_audit::document::load_paragraphs;
use cite_audit::llm::ChatClient;
use cite_audit::prompt::PromptTemplate;
use cite_audit::store::SourceStore;
use cite_audit::{AuditConfig, Auditor, Verifier};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DIVIDER: &str = "------------------------------";

#[derive(Parser)]
#[command(name = "cite-audit")]
#[command(version)]
#[command(about = "Audit the citations of an academic document")]
#[command(long_about = "Checks that every reference is cited exactly once, downloads the cited papers from arXiv, and asks a language model whether each citing sentence is supported by its source.\n\nEnvironment:\n  ZHIPUAI_API_KEY   API key for the model endpoint\n  RUST_LOG          log filter (default: cite_audit=warn)")]
struct Cli {
    /// Model identifier (e.g. glm-4)
    #[arg(long, env = "CITE_AUDIT_MODEL")]
    model: String,

    /// Prompt template file with two slots: citation text, reference text
    #[arg(long)]
    prompt: PathBuf,

    /// Document to audit (.docx or .txt)
    #[arg(long)]
    doc: PathBuf,

    /// Directory holding reference sources named by index (1.pdf, 2.pdf, ...)
    #[arg(long = "ref", value_name = "DIR")]
    ref_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cite_audit=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = AuditConfig::from_env()?;

    let template = PromptTemplate::load(&cli.prompt)?;
    let paragraphs = load_paragraphs(&cli.doc)?;
    let auditor = Auditor::new(&paragraphs, &config.references_heading)
        .with_context(|| format!("Failed to audit {}", cli.doc.display()))?;

    println!("Step 1: checking reference list and citation counts");
    print!("{}", auditor.check_citation_counts());
    println!("{}", DIVIDER);

    println!("Step 2: downloading references");
    let locator = ArxivClient::new(&config.arxiv_url, config.retry)?;
    auditor
        .download_references(
            &locator,
            &cli.ref_dir,
            config.download_concurrency,
            |outcome| println!("{}", outcome),
        )
        .await?;
    println!("{}", DIVIDER);

    println!("Step 3: verifying citations against their references");
    let api_key = config.require_api_key()?;
    let model = ChatClient::new(&config.model_url, api_key, &cli.model, config.retry)?;
    let store = SourceStore::open(&cli.ref_dir)?;
    tracing::info!(
        dir = %store.dir().display(),
        sources = ?store.indices().collect::<Vec<_>>(),
        "reference sources available"
    );
    let verifier = Verifier {
        sources: &store,
        model: &model,
        template: &template,
        markers: &config.markers,
    };
    let run = auditor
        .verify_citation_sentences(&verifier, |result| println!("{}", result))
        .await
        .with_context(|| format!("Verification aborted (model {})", model.model()))?;
    println!("{}", DIVIDER);
    println!("{}", run);

    Ok(())
}

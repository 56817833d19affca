//! kg-rag: ask questions about a knowledge graph from the terminal
//!
//! Connects to the configured graph store and language model, loads the node
//! context snapshot when it can and starts the question loop on stdin/stdout.
//! Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use kg_rag::{GraphRagPipeline, LlmClient, RagConfig, RemoteGraphStore, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kg-rag", version, about = "Entity-grounded question answering over a knowledge graph")]
struct Cli {
    /// YAML configuration file; KG_RAG_* variables override it
    #[arg(long, env = "KG_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "kg_rag=debug" } else { "kg_rag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = RagConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    info!(
        "Using {:?} model '{}' and {:?} store at {}",
        config.llm.provider, config.llm.model, config.store.dialect, config.store.url
    );

    let store = RemoteGraphStore::new(&config.store).context("cannot create graph store client")?;
    let model = LlmClient::new(&config.llm).context("cannot create language model client")?;

    let pipeline = GraphRagPipeline::from_config(&config, Arc::new(model), Arc::new(store))
        .await
        .context("pipeline startup failed")?;
    match pipeline.snapshot() {
        Some(snapshot) => info!("Node context ready ({} nodes)", snapshot.len()),
        None => warn!("Node context unavailable; retrying on the first question"),
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = std::io::stdout();
    Session::new(&pipeline)
        .run(stdin, stdout.lock())
        .await
        .context("terminal I/O failed")?;
    Ok(())
}

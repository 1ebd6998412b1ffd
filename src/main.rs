//! # Knowledge Copilot CLI (`kc`)
//!
//! ## Usage
//!
//! ```bash
//! kc --config ./config/kc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kc query "<text>"` | Answer a question from the knowledge index |
//! | `kc reindex` | Rebuild the knowledge index |
//! | `kc reset` | Delete the index output directory |
//! | `kc graph` | Print the node/link view of the index as JSON |
//! | `kc serve` | Start the HTTP API |
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr so
//! stdout carries only the answer or JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use knowledge_copilot::config::{self, Config};
use knowledge_copilot::graph::GraphView;
use knowledge_copilot::pipeline::Pipeline;
use knowledge_copilot::reindex::{reset_index, run_reindex};
use knowledge_copilot::server;
use knowledge_copilot::store::EvidenceStore;

/// Knowledge Copilot: answers questions about a code repository from its
/// knowledge graph index.
#[derive(Parser)]
#[command(name = "kc", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kc.toml`. Built-in defaults are used when the
    /// file does not exist. See `config/kc.example.toml`.
    #[arg(long, global = true, default_value = "./config/kc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question from the indexed repository.
    Query {
        /// Natural-language question.
        query: String,

        /// Print the full outcome (intent, strategy, evidence) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the knowledge index with the configured index command.
    Reindex,

    /// Delete the index output so the next query asks for a reindex.
    Reset,

    /// Print the graph view (nodes and links) as JSON.
    Graph,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::warn!(
            path = %path.display(),
            "config file not found, using built-in defaults"
        );
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Query { query, json } => {
            if query.trim().is_empty() {
                anyhow::bail!("query must not be empty");
            }
            let pipeline = Pipeline::from_config(&cfg);
            let outcome = pipeline.run(query.trim()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", outcome.answer);
            }
        }
        Commands::Reindex => {
            let report = run_reindex(&cfg).await?;
            println!("{}", report.message);
        }
        Commands::Reset => {
            let report = reset_index(&cfg).await?;
            println!("{}", report.message);
        }
        Commands::Graph => {
            let store = EvidenceStore::open(&cfg.index.output_dir())?;
            let view = GraphView::from_store(&store);
            println!(
                "{}",
                serde_json::to_string_pretty(&view).context("Failed to encode graph")?
            );
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

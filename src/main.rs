//! # pdf-rag CLI (`prag`)
//!
//! ## Usage
//!
//! ```bash
//! prag --config ./config/prag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `prag init` | Create the SQLite database and run schema migrations |
//! | `prag index [--rebuild]` | Build the index if missing, or force a rebuild |
//! | `prag clear` | Drop the index and the generation cache |
//! | `prag search "<query>"` | Retrieve passages without generating |
//! | `prag ask "<query>"` | Answer a question from the documents |
//! | `prag reset --session <id>` | Clear a persisted session |
//! | `prag serve` | Start the HTTP API |
//!
//! Logs are written to stderr and filtered with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use pdf_rag::engine::RagEngine;
use pdf_rag::{commands, config, migrate, server};

/// Question answering over a folder of PDF documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/prag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "prag", version, about = "Question answering over a folder of PDF documents")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/prag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Build the index from the document folder.
    ///
    /// Reuses a non-empty index built with the same embedding model unless
    /// `--rebuild` is given.
    Index {
        /// Re-chunk and re-embed every document.
        #[arg(long)]
        rebuild: bool,
    },

    /// Drop the index and the generation cache.
    Clear,

    /// Retrieve the passages most relevant to a query.
    Search {
        query: String,

        /// Number of passages (defaults to `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,

        /// Retrieval strategy: `similarity` or `mmr`.
        #[arg(long)]
        strategy: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question using the indexed documents.
    Ask {
        query: String,

        /// Session id for conversation history.
        #[arg(long)]
        session: Option<String>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Clear a session's history.
    Reset {
        #[arg(long)]
        session: String,
    },

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { rebuild } => {
            commands::run_index(&cfg, rebuild).await?;
        }
        Commands::Clear => {
            commands::run_clear(&cfg).await?;
        }
        Commands::Search {
            query,
            k,
            strategy,
            json,
        } => {
            commands::run_search(&cfg, &query, k, strategy.as_deref(), json).await?;
        }
        Commands::Ask {
            query,
            session,
            json,
        } => {
            commands::run_ask(&cfg, &query, session.as_deref(), json).await?;
        }
        Commands::Reset { session } => {
            commands::run_reset(&cfg, &session).await?;
        }
        Commands::Serve => {
            let engine = Arc::new(RagEngine::from_config(&cfg, false).await?);
            server::run_server(engine, &cfg.server.bind).await?;
        }
    }

    Ok(())
}

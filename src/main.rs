//! # Folio CLI (`folio`)
//!
//! The `folio` binary runs the portfolio API server and offers a few
//! commands for inspecting and backing up the document from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio init` | Create an empty document (no-op if one exists) |
//! | `folio serve` | Start the HTTP API server |
//! | `folio list <projects\|content>` | List records |
//! | `folio get <projects\|content> <id>` | Print one record as JSON |
//! | `folio search "<query>"` | Search projects and content |
//! | `folio stats` | Summarise the document and stored media |
//! | `folio export` | Dump the document as JSON |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use folio::{config, export, get, search, server, stats, store::Store};

/// Folio CLI — a JSON-document backed content API for portfolio sites.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/folio.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio — a JSON-document backed content API for portfolio sites",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/folio.toml`.
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Create the document file.
    ///
    /// Writes an empty document (no projects, no content, empty profile).
    /// Running it again leaves an existing document untouched.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,

    /// List records in a collection.
    List {
        /// `projects` or `content`.
        kind: String,
    },

    /// Print a record by id.
    Get {
        /// `projects` or `content`.
        kind: String,
        /// Record id.
        id: String,
    },

    /// Search projects and content.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results: `projects`, `content`, or `all`.
        #[arg(long, default_value = "all")]
        kind: String,

        /// Maximum number of results per collection.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show document and media statistics.
    Stats,

    /// Export the document as JSON.
    Export {
        /// Output file path. If omitted, writes to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::open(cfg.store.path.clone());
            if store.init().await? {
                println!("Document created at {}", store.path().display());
            } else {
                println!("Document already exists at {}", store.path().display());
            }
        }
        Commands::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();
            server::run_server(&cfg).await?;
        }
        Commands::List { kind } => {
            get::run_list(&cfg, &kind).await?;
        }
        Commands::Get { kind, id } => {
            get::run_get(&cfg, &kind, &id).await?;
        }
        Commands::Search { query, kind, limit } => {
            search::run_search(&cfg, &query, &kind, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
    }

    Ok(())
}

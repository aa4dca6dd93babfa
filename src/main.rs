//! # Snippet Search CLI (`snips`)
//!
//! ## Usage
//!
//! ```bash
//! snips --config ./config/snips.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `snips init` | Create the SQLite database and run schema migrations |
//! | `snips serve` | Start the HTTP server |
//! | `snips download <user>` | Clone or update every repository of a user |
//! | `snips train <user> <repo>` | Index one downloaded repository |
//! | `snips search <user> <repo> "<query>"` | Search a trained repository |
//! | `snips langs` | List supported languages |
//! | `snips indexes` | List known indexes and their state |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use snippet_search::config;
use snippet_search::migrate;
use snippet_search::server;
use snippet_search::service::Services;
use snippet_search_core::language::Language;
use snippet_search_core::models::RepoKey;
use snippet_search_core::search::SearchRequest;

/// Snippet Search: index repositories and search their code.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file is missing, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "snips",
    about = "Snippet Search: clone repositories, index their code, and search it",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/snips.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Clone or update every repository owned by a user.
    Download {
        user: String,
    },

    /// Index a downloaded repository.
    Train {
        user: String,
        repo: String,

        /// Rebuild the index even if the repository is already trained.
        #[arg(long)]
        retrain: bool,

        /// Succeed without doing anything if already trained.
        #[arg(long)]
        pretrained_ok: bool,
    },

    /// Search a trained repository.
    Search {
        user: String,
        repo: String,
        query: String,

        /// Only return snippets in this language (e.g. `Rust`).
        #[arg(long)]
        language: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// List supported languages.
    Langs,

    /// List known indexes with their row counts.
    Indexes,
}

fn load_or_default(path: &std::path::Path) -> anyhow::Result<config::Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(config::Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Langs = cli.command {
        for lang in Language::ALL.iter() {
            println!("{:<12} {}", lang.name(), lang.description());
        }
        return Ok(());
    }

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Download { user } => {
            let services = Services::build(cfg).await?;
            let snapshot = services.downloads.run(&user).await;
            if let Some(err) = &snapshot.error {
                anyhow::bail!("listing repositories for {} failed: {}", user, err);
            }
            for (repo, status) in &snapshot.repos {
                println!("{:<40} {}", repo, status);
            }
        }
        Commands::Train {
            user,
            repo,
            retrain,
            pretrained_ok,
        } => {
            let services = Services::build(cfg).await?;
            services.register_known().await?;
            let key = RepoKey::parse(&user, &repo)?;
            let trained = services
                .coordinator
                .train(&key, retrain, pretrained_ok)
                .await?;
            let engine = services.registry.get_or_create(&key).await?;
            let rows = engine.table().row_count().await?;
            if trained {
                println!("trained {}", key);
            } else {
                println!("{} already trained, nothing to do", key);
            }
            println!("  rows: {}", rows);
        }
        Commands::Search {
            user,
            repo,
            query,
            language,
            limit,
        } => {
            let services = Services::build(cfg).await?;
            services.register_known().await?;
            let key = RepoKey::parse(&user, &repo)?;
            let request = SearchRequest {
                query: &query,
                language: language.as_deref(),
                limit,
            };
            let records = services.search(&key, &request).await?;
            if records.is_empty() {
                println!("No results.");
            }
            for (i, rec) in records.iter().enumerate() {
                println!("{}. {} [{}]", i + 1, rec.filename, rec.language);
                println!("   {}", rec.link);
                for line in rec.text.lines() {
                    println!("   | {}", line);
                }
            }
        }
        Commands::Indexes => {
            let services = Services::build(cfg).await?;
            services.register_known().await?;
            let indexes = services.indexes().await?;
            if indexes.is_empty() {
                println!("No indexes.");
            }
            for status in indexes {
                println!(
                    "{:<40} trained={} rows={}",
                    status.index, status.trained, status.rows
                );
            }
        }
        Commands::Langs => unreachable!("handled before config loading"),
    }

    Ok(())
}

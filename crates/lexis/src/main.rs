//! Lexis: offline-capable vocabulary store
//!
//! Main binary with subcommands:
//! - `sync`: Refresh cached collections from the remote store
//! - `search`: Full-text search over a cached collection
//! - `dupes` / `merge` / `auto-merge`: Find and merge duplicate entries
//! - `import`: Bulk-write entries from a JSON file
//! - `stats`: Cache status per collection

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lexis_core::{Engine, EngineConfig};
use lexis_remote::{DocumentClient, VOCABULARY_COLLECTION};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "lexis")]
#[command(about = "Offline-capable vocabulary store", long_about = None)]
struct Cli {
    /// Document store URL
    #[arg(long, env = "LEXIS_REMOTE_URL", global = true)]
    remote_url: Option<String>,

    /// Bearer token for the document store
    #[arg(long, env = "LEXIS_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Cache database path (defaults to the user data directory)
    #[arg(long, env = "LEXIS_DB", global = true)]
    db: Option<PathBuf>,

    /// Engine config file (JSON)
    #[arg(long, env = "LEXIS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh collections older than their max age
    Sync {
        /// Only this collection (default: every configured collection)
        #[arg(long)]
        collection: Option<String>,

        /// Override the max age in minutes (0 forces a refresh)
        #[arg(long)]
        max_age_minutes: Option<u64>,
    },

    /// Search a cached collection
    Search {
        /// Query text; the last word matches as a prefix
        query: String,

        #[arg(long, default_value = VOCABULARY_COLLECTION)]
        collection: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List duplicate groups
    Dupes {
        #[arg(long, default_value = VOCABULARY_COLLECTION)]
        collection: String,
    },

    /// Merge the duplicate group for one word
    Merge {
        /// The duplicated word
        key: String,

        /// Id of the entry to keep
        #[arg(long)]
        keep: Option<String>,

        #[arg(long, default_value = VOCABULARY_COLLECTION)]
        collection: String,
    },

    /// Merge every exact duplicate group (Ctrl-C stops between batches)
    AutoMerge {
        #[arg(long, default_value = VOCABULARY_COLLECTION)]
        collection: String,
    },

    /// Import entries from a JSON array file
    Import {
        file: PathBuf,

        #[arg(long, default_value = VOCABULARY_COLLECTION)]
        collection: String,
    },

    /// Show cache status per collection
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lexis=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let engine = open_engine(&cli).await?;
    let mut out = std::io::stdout().lock();

    let result = match cli.command {
        Commands::Sync {
            collection,
            max_age_minutes,
        } => commands::sync(&engine, collection.as_deref(), max_age_minutes, &mut out).await,
        Commands::Search {
            query,
            collection,
            limit,
        } => commands::search(&engine, &collection, &query, limit, &mut out).await,
        Commands::Dupes { collection } => commands::dupes(&engine, &collection, &mut out),
        Commands::Merge {
            key,
            keep,
            collection,
        } => commands::merge(&engine, &collection, &key, keep.as_deref(), &mut out).await,
        Commands::AutoMerge { collection } => {
            commands::auto_merge(&engine, &collection, &mut out).await
        }
        Commands::Import { file, collection } => {
            commands::import(&engine, &collection, &file, &mut out).await
        }
        Commands::Stats => commands::stats(&engine, &mut out),
    };

    engine.close();
    result
}

async fn open_engine(cli: &Cli) -> Result<Arc<Engine>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .map_err(|e| miette::miette!("failed to load config {}: {}", path.display(), e))?,
        None => EngineConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db_path = Some(db.clone());
    }
    if config.db_path.is_none() {
        config.db_path = Some(default_db_path()?);
    }
    if let Some(parent) = config.db_path.as_deref().and_then(|p| p.parent()) {
        std::fs::create_dir_all(parent).into_diagnostic()?;
    }

    let remote_url = cli
        .remote_url
        .as_deref()
        .ok_or_else(|| miette::miette!("no remote store configured: set --remote-url or LEXIS_REMOTE_URL"))?;
    let client = DocumentClient::new(remote_url).map_err(|e| miette::miette!("{}", e))?;
    client.set_token(cli.token.clone()).await;

    Engine::open(config, Arc::new(client)).map_err(|e| miette::miette!("failed to open engine: {}", e))
}

fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| miette::miette!("no data directory; pass --db or set LEXIS_DB"))?;
    Ok(dir.join("lexis").join("cache.db"))
}

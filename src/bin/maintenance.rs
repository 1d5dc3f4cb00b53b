//! Cortex maintenance runner
//!
//! Runs lifecycle maintenance and embedding backfill against a Cortex
//! database, once or on a schedule.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cortex::embedding::{Embedder, LazyEmbedder, DEFAULT_HASH_DIMENSIONS};
use cortex::error::{CortexError, Result};
use cortex::lifecycle::{
    parse_duration, CancelToken, LifecycleEngine, MaintenanceConfig, MaintenanceWorker,
    DEFAULT_MAINTENANCE_INTERVAL,
};
use cortex::storage::Storage;
use cortex::store::MemoryStore;
use cortex::types::{EmbeddingConfig, StorageConfig, StorageMode};

#[derive(Parser, Debug)]
#[command(name = "cortex-maintenance")]
#[command(about = "Lifecycle maintenance for Cortex memory stores")]
#[command(version)]
struct Args {
    /// Database path
    #[arg(long, env = "CORTEX_DB_PATH", default_value = "~/.openclaw/cortex.db")]
    db_path: String,

    /// Storage mode (local or cloud-safe)
    #[arg(long, env = "CORTEX_STORAGE_MODE", default_value = "local")]
    storage_mode: String,

    /// Embedding backend (hash, openai)
    #[arg(long, env = "CORTEX_EMBEDDING_MODEL", default_value = "hash")]
    embedding_model: String,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long, env = "OPENAI_BASE_URL")]
    openai_base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one maintenance pass and print its stats as JSON
    Run,
    /// Run maintenance on an interval until interrupted
    Daemon {
        /// Interval between runs (seconds, or with an s/m/h/d suffix)
        #[arg(long, env = "CORTEX_CLEANUP_INTERVAL", value_parser = parse_interval)]
        interval: Option<Duration>,
    },
    /// Generate embeddings for memories that have none
    Backfill {
        #[arg(long, default_value = "10")]
        batch_size: usize,
    },
}

fn parse_interval(raw: &str) -> std::result::Result<Duration, String> {
    match parse_duration(raw) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(format!("invalid interval: {}", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let db_path = shellexpand::tilde(&args.db_path).to_string();
    let storage_mode: StorageMode = args
        .storage_mode
        .parse()
        .map_err(CortexError::Config)?;

    let storage = Storage::open(StorageConfig {
        db_path,
        storage_mode,
    })?;

    // text-embedding-3-small returns 1536 dimensions
    let dimensions = if args.embedding_model == "openai" {
        1536
    } else {
        DEFAULT_HASH_DIMENSIONS
    };
    let embedding_config = EmbeddingConfig {
        model: args.embedding_model,
        dimensions,
        api_key: args.openai_key,
        base_url: args.openai_base_url,
        ..Default::default()
    };
    let embedder: Arc<dyn Embedder> = Arc::new(LazyEmbedder::new(embedding_config));

    let config = MaintenanceConfig::from_env();

    match args.command {
        Command::Run => {
            let engine = LifecycleEngine::new(storage.clone(), embedder);
            let stats = engine.run_maintenance(&config, &CancelToken::new())?;
            storage.checkpoint()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Daemon { interval } => {
            let period = interval.unwrap_or(DEFAULT_MAINTENANCE_INTERVAL);
            let engine = Arc::new(LifecycleEngine::new(storage, embedder));
            let worker = MaintenanceWorker::start(engine, config, period);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Interrupt received, stopping");
            worker.stop().await?;
        }
        Command::Backfill { batch_size } => {
            let store = MemoryStore::new(storage, embedder);
            let stored = tokio::task::spawn_blocking(move || store.backfill_embeddings(batch_size))
                .await
                .map_err(|e| CortexError::Internal(format!("backfill task failed: {}", e)))??;
            println!("{}", serde_json::json!({ "stored": stored }));
        }
    }

    Ok(())
}

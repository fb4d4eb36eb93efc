//! ctxkit CLI: the main entry point.
//!
//! Commands:
//! - `process` Run the context pipeline over a conversation
//! - `score`   Rank messages by relevance to a query
//! - `select`  Query-aware context selection
//! - `graph`   Show dependency edges and clusters
//! - `stats`   Token usage and budget diagnostics
//! - `config`  Print the effective or default configuration

use clap::{Parser, Subcommand};
use ctxkit_cache::CacheRegistry;
use ctxkit_engine::ProcessedContext;
use std::path::PathBuf;
use std::sync::LazyLock;

mod commands;

/// Process-wide cache registry, handed to the engine by reference.
static CACHE_REGISTRY: LazyLock<CacheRegistry<ProcessedContext>> = LazyLock::new(CacheRegistry::new);

#[derive(Parser)]
#[command(
    name = "ctxkit",
    about = "ctxkit: context assembly for LLM conversations",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.ctxkit/config.toml)
    #[arg(short, long, global = true, env = "CTXKIT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run summarization, sliding window and compression over a conversation
    Process {
        /// JSON file holding an array of messages (`-` for stdin)
        file: PathBuf,

        /// Target model id
        #[arg(short, long)]
        model: Option<String>,

        /// Skip every optimization step
        #[arg(long)]
        full_context: bool,

        #[arg(long)]
        no_summary: bool,

        #[arg(long)]
        no_window: bool,

        #[arg(long)]
        no_compression: bool,

        /// Emit the processed context as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rank messages by relevance to a query
    Score {
        file: PathBuf,

        #[arg(short, long)]
        query: String,

        /// Maximum messages to keep
        #[arg(long, default_value_t = 10)]
        max: usize,

        /// Override the configured relevance threshold
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        json: bool,
    },

    /// Select the best context for a query within the model's budget
    Select {
        file: PathBuf,

        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show message dependencies and clusters
    Graph {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Show token usage against the model's budget
    Stats {
        file: PathBuf,

        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Print configuration as TOML
    Config {
        /// Print built-in defaults instead of the effective configuration
        #[arg(long)]
        defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Process {
            file,
            model,
            full_context,
            no_summary,
            no_window,
            no_compression,
            json,
        } => {
            let options = ctxkit_engine::ProcessingOptions {
                full_context,
                disable_summary: no_summary,
                disable_window: no_window,
                disable_compression: no_compression,
                force_refresh: false,
            };
            commands::process::run(config_path, &CACHE_REGISTRY, &file, model, options, json).await?
        }
        Commands::Score {
            file,
            query,
            max,
            threshold,
            json,
        } => {
            commands::score::run(config_path, &CACHE_REGISTRY, &file, &query, max, threshold, json)
                .await?
        }
        Commands::Select {
            file,
            query,
            model,
            json,
        } => commands::select::run(config_path, &CACHE_REGISTRY, &file, &query, model, json).await?,
        Commands::Graph { file, json } => commands::graph::run(&file, json).await?,
        Commands::Stats { file, model, json } => {
            commands::stats::run(config_path, &CACHE_REGISTRY, &file, model, json).await?
        }
        Commands::Config { defaults } => commands::config_cmd::run(config_path, defaults).await?,
    }

    Ok(())
}

//! Auspex CLI: the main entry point.
//!
//! Commands:
//! - `serve`    : start the HTTP gateway
//! - `ingest`   : load a JSONL knowledge file into the vector store
//! - `ask`      : run one request through the pipeline locally
//! - `doctor`   : diagnose configuration, store and embedder
//! - `onboard`  : write the default config

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "auspex",
    about = "Auspex: admission-gated, retrieval-augmented guidance",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.auspex/config.toml)
    #[arg(short, long, global = true, env = "AUSPEX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Embed and store knowledge chunks from a JSONL file
    Ingest {
        /// One chunk per line: {"id", "title"?, "content", "source"?, "mode"}
        file: PathBuf,
    },

    /// Ask a single question through the full pipeline
    Ask {
        message: String,

        /// Guidance mode (general, career, relationship, health, ...)
        #[arg(short, long, default_value = "general")]
        mode: String,

        /// Short statement of what the caller is after
        #[arg(long)]
        intent: Option<String>,

        /// Print delivery events as JSON lines instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration, store and embedder
    Doctor,

    /// Write the default configuration file
    Onboard,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ingest { file } => commands::ingest::run(config_path, &file).await?,
        Commands::Ask {
            message,
            mode,
            intent,
            json,
        } => commands::ask::run(config_path, message, mode, intent, json).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Onboard => commands::onboard::run(config_path).await?,
    }

    Ok(())
}

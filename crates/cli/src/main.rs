//! Pagewise CLI: ask questions about a PDF document.
//!
//! Commands:
//! - `init`    write a default config file
//! - `ingest`  build the vector index of the configured document
//! - `chat`    interactive chat session
//! - `ask`     answer a single question
//! - `serve`   start the HTTP API
//! - `status`  show configuration and index state

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "pagewise",
    about = "Pagewise: chat with a PDF document",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.pagewise/config.toml)
    #[arg(short, long, global = true, env = "PAGEWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Build the vector index of the configured document
    Ingest {
        /// Rebuild even if an index already exists
        #[arg(short, long)]
        force: bool,
    },

    /// Start an interactive chat session
    Chat {
        /// Pipeline variant: basic or upgraded
        #[arg(long)]
        variant: Option<String>,
    },

    /// Ask a single question and print the answer with its sources
    Ask {
        #[arg(short, long)]
        message: String,

        /// Pipeline variant: basic or upgraded
        #[arg(long)]
        variant: Option<String>,
    },

    /// Start the HTTP API server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show configuration and index status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

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
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Ingest { force } => commands::ingest::run(config_path, force).await?,
        Commands::Chat { variant } => commands::chat::run(config_path, variant).await?,
        Commands::Ask { message, variant } => {
            commands::ask::run(config_path, &message, variant).await?
        }
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Status => commands::status::run(config_path).await?,
    }

    Ok(())
}

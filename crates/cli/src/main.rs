//! Kestrel CLI: the main entry point.
//!
//! Commands:
//! - `chat`: Interactive chat or single-message mode
//! - `models`: List the models a provider offers
//! - `init`: Write a default config file

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kestrel",
    about = "Kestrel: a coding agent for your terminal",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the coding agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Provider to start with (overrides the config)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model to start with (overrides the config)
        #[arg(long)]
        model: Option<String>,

        /// Maximum tool rounds per message
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Run file edits and shell commands without asking
        #[arg(long)]
        auto_approve: bool,
    },

    /// List models offered by a provider
    Models {
        /// Provider to query (defaults to the configured provider)
        #[arg(short, long)]
        provider: Option<String>,

        /// Bypass the model cache
        #[arg(long)]
        refresh: bool,
    },

    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            provider,
            model,
            max_rounds,
            auto_approve,
        } => {
            let options = commands::ChatOptions {
                provider,
                model,
                max_rounds,
                auto_approve,
            };
            commands::chat::run(message, options).await?
        }
        Commands::Models { provider, refresh } => commands::models::run(provider, refresh).await?,
        Commands::Init => commands::init::run().await?,
    }

    Ok(())
}

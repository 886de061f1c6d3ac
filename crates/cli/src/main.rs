//! reactloop CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP gateway
//! - `ask`     — Run a single query through the agent loop
//! - `tools`   — Show the tool catalog after discovery
//! - `doctor`  — Diagnose configuration and discovery servers

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "reactloop",
    about = "reactloop — a ReAct agent loop with tiered tool fallback",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of ~/.reactloop/config.toml
    #[arg(short, long, global = true, env = "REACTLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask the agent a single question
    Ask {
        /// The question
        query: String,

        /// Attach an image (local path or URL); repeatable
        #[arg(short, long = "image")]
        images: Vec<String>,

        /// Add a user profile field as key=value; repeatable
        #[arg(short, long = "profile", value_parser = commands::ask::parse_profile_field)]
        profile: Vec<(String, String)>,

        /// Print the whole run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tools the agent can use
    Tools,

    /// Diagnose configuration and discovery servers
    Doctor,
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
        Commands::Serve { port } => commands::serve::run(config_path, port).await?,
        Commands::Ask {
            query,
            images,
            profile,
            json,
        } => commands::ask::run(config_path, query, images, profile, json).await?,
        Commands::Tools => commands::tools::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "replayscan")]
#[command(about = "Replay recorded user actions and audit every meaningful page state for accessibility", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an action recording and analyse the captured snapshots
    Run {
        /// JSON file holding the recorded action list
        #[arg(short, long)]
        actions: PathBuf,

        /// Session target URL (defaults to the first navigate action)
        #[arg(long)]
        url: Option<String>,

        /// Config file (defaults to ~/.replayscan/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Session ID (defaults to a fresh timestamped id)
        #[arg(short, long)]
        session: Option<String>,

        /// Show the browser window
        #[arg(long)]
        headed: bool,

        /// Save a full-page screenshot per snapshot
        #[arg(long)]
        screenshots: bool,

        /// Analyse repeated header/nav/footer regions once
        #[arg(long)]
        static_sections: bool,

        /// Skip text analysis even when a provider is configured
        #[arg(long)]
        no_analysis: bool,

        /// Write the full session result as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the manifest of a stored session
    Manifest {
        /// Session ID
        session_id: String,

        /// Print raw JSON instead of a step table
        #[arg(long)]
        json: bool,
    },

    /// Show configuration, browser and provider status
    Status {
        /// Config file (defaults to ~/.replayscan/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins when set.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            actions,
            url,
            config,
            session,
            headed,
            screenshots,
            static_sections,
            no_analysis,
            output,
        } => {
            let args = commands::run_cmd::RunArgs {
                actions,
                url,
                config,
                session,
                headed,
                screenshots,
                static_sections,
                no_analysis,
                output,
            };
            commands::run_cmd::run(args).await?;
        }
        Commands::Manifest { session_id, json } => {
            commands::manifest_cmd::run(&session_id, json).await?;
        }
        Commands::Status { config } => {
            commands::status::run(config).await?;
        }
    }

    Ok(())
}

//! Stagecraft CLI - run and inspect declarative pipelines.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Stagecraft - declarative pipeline orchestration.
#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a YAML file
    Run {
        /// Path to the pipeline YAML file
        file: String,

        /// Stop the pipeline after this many seconds (streaming pipelines
        /// run until interrupted otherwise)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Print pipeline events to stdout as they happen
        #[arg(short, long)]
        events: bool,
    },

    /// Validate a pipeline YAML file without running it
    Validate {
        /// Path to the pipeline YAML file
        file: String,
    },

    /// List the available step types (built-ins plus loaded services)
    Steps,

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            timeout,
            events,
        } => commands::run::run(&file, timeout, events).await,
        Commands::Validate { file } => commands::validate::run(&file),
        Commands::Steps => commands::steps::run(),
        Commands::Version => commands::version::run(),
    }
}

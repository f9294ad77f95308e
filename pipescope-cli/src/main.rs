//! Pipescope CLI: terminal host for the pipeline dashboard engine.
//!
//! Runs the engine against a live backend and prints the dashboard as a
//! compact table or as JSON lines.

mod commands;
mod render;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Pipescope: live view of a document-processing pipeline
#[derive(Parser, Debug)]
#[command(name = "pipescope", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Workspace directory (for `.pipescope/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Override the snapshot endpoint URL
    #[arg(long)]
    snapshot_url: Option<String>,

    /// Override the stream endpoint URL
    #[arg(long)]
    stream_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run the engine and print the dashboard as it changes
    Watch {
        /// Print each view as a JSON line instead of a table
        #[arg(long)]
        json: bool,
        /// Start with animation paused
        #[arg(long)]
        paused: bool,
        /// Minimum milliseconds between printed updates
        #[arg(long, default_value = "1000")]
        refresh_ms: u64,
    },
    /// Fetch one snapshot and print it as JSON
    Snapshot,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
    /// List the configuration files that are consulted
    Path,
}

/// Endpoint overrides given on the command line.
#[derive(Debug, Default, Clone)]
pub(crate) struct Overrides {
    pub snapshot_url: Option<String>,
    pub stream_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "pipescope", "pipescope")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "pipescope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let overrides = Overrides {
        snapshot_url: cli.snapshot_url,
        stream_url: cli.stream_url,
    };

    commands::handle_command(cli.command, &workspace, &overrides).await
}

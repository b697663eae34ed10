//! CLI for the bulkfetch batch retrieval engine.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the bulkfetch batch retrieval engine.
#[derive(Debug, Parser)]
#[command(name = "bulkfetch")]
#[command(about = "bulkfetch: adaptive concurrent batch retrieval from asset services", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Task-source and service options shared by subcommands.
#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Project identifier at the remote service.
    #[arg(long)]
    pub project: String,

    /// Base URL of the asset service API.
    #[arg(long)]
    pub base_url: String,

    /// JSON manifest of tasks to fetch. When omitted, the service's
    /// structure listing for the project is used instead.
    #[arg(long, value_name = "FILE")]
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch every task in the manifest (or project listing) and report.
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Output directory for fetched payloads.
        #[arg(long, default_value = "export", value_name = "DIR")]
        out: PathBuf,

        /// Override the configured worker ceiling.
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// After the run, feed the failed subset through one retry pass.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Print the execution plan for a task set without fetching anything.
    Plan {
        #[command(flatten)]
        source: SourceArgs,
    },
}

impl CliCommand {
    /// Parses std::env::args and runs the selected command.
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        match cli.command {
            CliCommand::Run {
                source,
                out,
                workers,
                retry_failed,
            } => commands::run_export(source, out, workers, retry_failed).await,
            CliCommand::Plan { source } => commands::run_plan(source).await,
        }
    }
}

//! Recast CLI - Command-line interface
//!
//! Runs transcode jobs on the job pool against the simulated media backend.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use recast_core::config::RecastConfig;
use recast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "recast")]
#[command(about = "Hardware-accelerated video transcoding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level; the log file always records everything
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for recast-last-run.log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let config = RecastConfig::from_env();
    commands::handle_command(cli.command, config)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    Ok(())
}

//! Segbuf CLI - Command-line interface
//!
//! Plays media from a segment server into a headless decoder, or runs
//! simulated playback scenarios.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use segbuf_core::tracing_setup::{CliLogLevel, init_tracing};
use tracing::Level;

#[derive(Parser)]
#[command(name = "segbuf")]
#[command(about = "Segment buffering engine for adaptive playback")]
struct Cli {
    /// Console log level
    #[arg(long, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full debug log
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(Level::from(cli.log_level), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command).await
}

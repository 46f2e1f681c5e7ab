//! Chunkmux CLI - Command-line interface
//!
//! Drives a remuxing worker around the ffmpeg binary.

mod commands;

use std::path::PathBuf;

use chunkmux_core::ChunkmuxError;
use chunkmux_core::tracing_setup::{CliLogLevel, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "chunkmux")]
#[command(about = "Remux media files into browser-playable chunks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full trace log
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    if let Err(e) = commands::handle_command(cli.command).await {
        if let Some(error) = e.downcast_ref::<ChunkmuxError>() {
            eprintln!("Error: {}", error.user_message());
        }
        return Err(e);
    }

    Ok(())
}

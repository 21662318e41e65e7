//! Kosmos CLI
//!
//! Drives a Kosmos board (or the in-process simulator) from the command line.

use clap::Parser;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "kosmos=info" } else { "kosmos=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let session = || commands::open(&cli);
    match &cli.command {
        Commands::Status => commands::query::status(&session()?)?,
        Commands::Reset => commands::emulate::reset(&session()?)?,
        Commands::Keystroke {
            key,
            duration,
            repeat,
            delay,
        } => commands::emulate::keystroke(&session()?, *key, *duration, *repeat, *delay)?,
        Commands::ReleaseAll => commands::emulate::release_all(&session()?)?,
        Commands::I2cDump { mode, count } => {
            commands::capture::i2c_dump(&session()?, *mode, *count)?
        }
        Commands::RgbCapture { duration } => commands::capture::rgb_capture(&session()?, *duration)?,
        // The catalogue needs no board
        Commands::Keys { filter } => commands::query::keys(filter.as_deref(), cli.json)?,
    }

    Ok(())
}

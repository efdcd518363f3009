mod bridge;
mod buttons;
mod cassette;
mod cli;
mod clock;
mod config;
mod engine;
mod face;
mod memories;
mod messages;
mod meter;
mod screen;
mod server;
mod sfx;
mod status;
mod token;
mod tui;
mod visual;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config::BmoConfig;

/// BMO_LOG wins over RUST_LOG; both default to info.
fn env_filter() -> EnvFilter {
    std::env::var("BMO_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// The face owns the terminal, so it logs to a file; subcommands log to stderr.
fn init_logging(to_file: bool) -> Result<()> {
    if to_file {
        let path = BmoConfig::log_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = cli::Cli::parse();
    if let Some(command) = cli_args.command {
        init_logging(false)?;
        cli::handle_cli_command(command).await
    } else {
        init_logging(true)?;
        tui::run_tui(BmoConfig::load()?).await
    }
}

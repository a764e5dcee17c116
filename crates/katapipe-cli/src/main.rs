//! katapipe — convenience wrapper around the KataGo parallel analysis
//! engine.
//!
//! Queries come in on stdin (JSON, inline SGF or SGF paths), are expanded
//! into per-turn requests, and the engine's out-of-order responses leave on
//! stdout re-ordered, enriched, or joined per query.

mod driver;
mod options;
mod progress;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use options::{Cli, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    // stdout carries response lines, so logs go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = Settings::from_cli(cli);
    if settings.engine_command.is_empty() && settings.needs_engine() {
        let _ = Cli::command().write_help(&mut std::io::stderr());
        eprintln!();
        std::process::exit(1);
    }
    refuse_to_overwrite_executable(&settings)?;

    driver::run(settings).await
}

/// A typo'd --suspend-to must never clobber the engine binary.
fn refuse_to_overwrite_executable(settings: &Settings) -> Result<()> {
    let Some(path) = &settings.suspend_to else {
        return Ok(());
    };
    if is_executable(path) {
        anyhow::bail!(
            "You are trying to overwrite an executable file! ({})",
            path.display()
        );
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &std::path::Path) -> bool {
    false
}

//! Logger setup.
//!
//! The TUI owns the terminal, so in TUI mode log records go to a file instead of stderr.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Where log records are written.
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

/// Install the global logger. `RUST_LOG` overrides `level` when set.
pub fn init(level: &str, target: LogTarget) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    if let LogTarget::File(path) = target {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("install logger")?;
    Ok(())
}

mod cli;
mod dataset;
mod error;
mod logging;
mod metrics;
mod model;
mod orchestrator;
mod player;
mod render;
mod selection;
mod service;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;
mod workspace;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = !args.is_tui();

    let target = if is_non_tui {
        logging::LogTarget::Stderr
    } else {
        logging::LogTarget::File(storage::log_dir()?.join("mapgraph.log"))
    };
    logging::init(&args.log_level, target)?;

    cli::run(args).await?;
    if is_non_tui {
        // Explicitly exit with code 0 on success, especially for non-TUI modes
        std::process::exit(0);
    }
    Ok(())
}

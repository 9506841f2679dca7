//! imageset CLI: build captioned image datasets from a text prompt.
//!
//! Expands the prompt into domains and search queries with an LLM, collects
//! matching images, and writes them with captions and metadata to disk.

mod commands;
mod views;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

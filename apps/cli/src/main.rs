//! docharvest CLI: incremental harvesting of recently changed Confluence
//! pages and Google Docs into sectioned JSON records and keyed bundles.

mod commands;

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

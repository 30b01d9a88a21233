mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    match cli.command {
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Address(args) => commands::address::run(args).await,
        Command::Sign(args) => commands::sign::run(args).await,
        Command::Version(args) => commands::version::run(args).await,
    }
}

//! eoforge CLI - derive datasets from a geospatial catalog.
//!
//! The main entry point for the `eoforge` binary.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use eoforge_cli::commands;
use eoforge_cli::{Cli, Commands};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.config();
    eoforge_core::init_logging(config.log_format);

    // Transforms run on the blocking pool; the async side only does I/O.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::RunOne(args) => commands::run_one::execute(args, &config).await,
            Commands::RunMany(args) => commands::run_many::execute(args, &config).await,
            Commands::AddToQueue(args) => commands::add_to_queue::execute(args, &config).await,
            Commands::AddIdsToQueue(args) => {
                commands::add_ids_to_queue::execute(args, &config).await
            }
            Commands::AddMissingToQueue(args) => {
                commands::add_missing_to_queue::execute(args, &config).await
            }
            Commands::RunFromQueue(args) => commands::run_from_queue::execute(args, &config).await,
            Commands::RedriveToQueue(args) => {
                commands::redrive_to_queue::execute(args, &config).await
            }
        }
    })
}

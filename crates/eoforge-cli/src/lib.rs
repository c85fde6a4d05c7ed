//! # eoforge-cli
//!
//! Command-line interface for running eoforge jobs.
//!
//! ## Commands
//!
//! - `eoforge run-one` - Process one dataset by id
//! - `eoforge run-many` - Process every dataset matching search expressions
//! - `eoforge add-to-queue` - Enqueue datasets matching search expressions
//! - `eoforge add-ids-to-queue` - Enqueue datasets by id
//! - `eoforge add-missing-to-queue` - Enqueue datasets whose output is not indexed yet
//! - `eoforge run-from-queue` - Process queued datasets
//! - `eoforge redrive-to-queue` - Move messages out of a dead-letter queue
//!
//! ## Configuration
//!
//! Every flag can also be set through the environment:
//!
//! - `EOFORGE_CONFIG_FILE` - Job configuration, a local path or `http(s)://` URL
//! - `EOFORGE_CATALOG_URL` - STAC API root to search
//! - `EOFORGE_QUEUE` - Work queue name
//! - `EOFORGE_LOG_FORMAT` - `pretty` or `json`
//!
//! Batch commands exit with the number of failed tasks (capped at 255).
//! Queue and S3 access need the `aws` feature and the usual `AWS_*`
//! credentials.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use clap::{Parser, Subcommand};

use eoforge_core::LogFormat;

/// STAC API searched when none is configured.
pub const DEFAULT_CATALOG_URL: &str = "https://explorer.dea.ga.gov.au/stac";

/// eoforge - derive datasets from a geospatial catalog.
#[derive(Debug, Parser)]
#[command(name = "eoforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// STAC API root to search for datasets.
    #[arg(long, global = true, env = "EOFORGE_CATALOG_URL", default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// Log output format.
    #[arg(long, global = true, env = "EOFORGE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormatArg,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            catalog_url: self.catalog_url.clone(),
            log_format: self.log_format.into(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Process one dataset by id.
    RunOne(commands::run_one::RunOneArgs),
    /// Process every dataset matching search expressions.
    RunMany(commands::run_many::RunManyArgs),
    /// Enqueue datasets matching search expressions.
    AddToQueue(commands::add_to_queue::AddToQueueArgs),
    /// Enqueue datasets by id.
    AddIdsToQueue(commands::add_ids_to_queue::AddIdsToQueueArgs),
    /// Enqueue matching datasets whose output is not indexed yet.
    AddMissingToQueue(commands::add_missing_to_queue::AddMissingToQueueArgs),
    /// Process datasets from a work queue.
    RunFromQueue(commands::run_from_queue::RunFromQueueArgs),
    /// Move messages from a dead-letter queue back to a work queue.
    RedriveToQueue(commands::redrive_to_queue::RedriveToQueueArgs),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormatArg {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => Self::Pretty,
            LogFormatArg::Json => Self::Json,
        }
    }
}

/// CLI configuration shared by every command.
#[derive(Debug, Clone)]
pub struct Config {
    /// STAC API root.
    pub catalog_url: String,
    /// Log output format.
    pub log_format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_apply_after_the_subcommand() {
        let cli = Cli::parse_from([
            "eoforge",
            "run-many",
            "--config-file",
            "job.yaml",
            "--catalog-url",
            "https://stac.example.com",
            "--log-format",
            "json",
        ]);

        let config = cli.config();
        assert_eq!(config.catalog_url, "https://stac.example.com");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Commands::RunMany(_)));
    }

    #[test]
    fn test_every_command_is_reachable() {
        let parse = |args: &[&str]| {
            Cli::try_parse_from(std::iter::once("eoforge").chain(args.iter().copied()))
                .map(|cli| cli.command)
        };
        assert!(matches!(
            parse(&["run-one", "--config-file", "c.yaml", "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10"]),
            Ok(Commands::RunOne(_))
        ));
        assert!(matches!(
            parse(&["add-to-queue", "--config-file", "c.yaml", "--queue", "q"]),
            Ok(Commands::AddToQueue(_))
        ));
        assert!(matches!(
            parse(&["add-ids-to-queue", "--config-file", "c.yaml", "--queue", "q"]),
            Ok(Commands::AddIdsToQueue(_))
        ));
        assert!(matches!(
            parse(&["add-missing-to-queue", "--config-file", "c.yaml", "--queue", "q"]),
            Ok(Commands::AddMissingToQueue(_))
        ));
        assert!(matches!(
            parse(&["run-from-queue", "--config-file", "c.yaml", "--queue", "q"]),
            Ok(Commands::RunFromQueue(_))
        ));
        assert!(matches!(
            parse(&["redrive-to-queue", "--queue", "q-dlq"]),
            Ok(Commands::RedriveToQueue(_))
        ));
        assert!(parse(&["deploy"]).is_err());
    }
}

//! Run-many command - process every matching dataset.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use eoforge_flow::Runner;

use super::{JobArgs, PublishArgs, SearchArgs};
use crate::Config;

/// Arguments for the run-many command.
#[derive(Debug, Args)]
pub struct RunManyArgs {
    /// Search flags.
    #[command(flatten)]
    pub search: SearchArgs,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,

    /// Publishing flags.
    #[command(flatten)]
    pub publish: PublishArgs,
}

/// Execute the run-many command.
///
/// Tasks run with the job's configured concurrency. Individual failures are
/// counted, not fatal.
///
/// # Errors
///
/// Returns an error if the expressions are invalid, the job cannot be set
/// up, or the catalog search fails.
pub async fn execute(args: RunManyArgs, config: &Config) -> Result<ExitCode> {
    let filter = args.search.filter()?;
    let ctx = super::context(config, &args.job, args.publish.sns_arn.as_deref()).await?;
    let report = Runner::new(ctx)
        .run_many(&filter, args.search.limit, args.search.product_limit, args.job.dryrun)
        .await?;
    Ok(super::finish(report))
}

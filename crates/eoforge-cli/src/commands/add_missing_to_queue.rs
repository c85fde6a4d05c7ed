//! Add-missing-to-queue command - enqueue datasets not yet processed.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use eoforge_flow::catalog::DatasetPredicate;

use super::{JobArgs, QueueArgs, SearchArgs};
use crate::Config;

/// Arguments for the add-missing-to-queue command.
#[derive(Debug, Args)]
pub struct AddMissingToQueueArgs {
    /// Search flags.
    #[command(flatten)]
    pub search: SearchArgs,

    /// Queue flags.
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Only enqueue datasets satisfying a comparison, e.g.
    /// `properties.eo:cloud_cover < 20`.
    #[arg(long, env = "EOFORGE_PREDICATE")]
    pub predicate: Option<DatasetPredicate>,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,
}

/// Execute the add-missing-to-queue command.
///
/// A dataset is missing when the catalog has no dataset with the output id
/// the job would give it.
///
/// # Errors
///
/// Returns an error if the expressions are invalid, the queue cannot be
/// opened, the search fails or the queue rejects messages.
pub async fn execute(args: AddMissingToQueueArgs, config: &Config) -> Result<ExitCode> {
    let filter = args.search.filter()?;
    let ctx = super::context(config, &args.job, None).await?;
    let queue = ctx.queues()?.queue(&args.queue.queue).await?;

    let transform = &ctx.config().specification.transform;
    let version = ctx.registry().version_major_minor(transform);
    let datasets = ctx
        .locator()
        .find_unprocessed(&filter, args.search.limit, &version, args.predicate);
    let sent = ctx
        .mediator()
        .enqueue(queue.as_ref(), datasets, args.job.dryrun)
        .await?;

    let verb = if args.job.dryrun { "Would add" } else { "Added" };
    println!("{verb} {sent} missing datasets to {}", args.queue.queue);
    Ok(ExitCode::SUCCESS)
}

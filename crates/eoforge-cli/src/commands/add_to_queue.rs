//! Add-to-queue command - enqueue every matching dataset.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use super::{JobArgs, QueueArgs, SearchArgs};
use crate::Config;

/// Arguments for the add-to-queue command.
#[derive(Debug, Args)]
pub struct AddToQueueArgs {
    /// Search flags.
    #[command(flatten)]
    pub search: SearchArgs,

    /// Queue flags.
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,
}

/// Execute the add-to-queue command.
///
/// # Errors
///
/// Returns an error if the expressions are invalid, the queue cannot be
/// opened, the search fails or the queue rejects messages.
pub async fn execute(args: AddToQueueArgs, config: &Config) -> Result<ExitCode> {
    let filter = args.search.filter()?;
    let ctx = super::context(config, &args.job, None).await?;
    let queue = ctx.queues()?.queue(&args.queue.queue).await?;

    let datasets =
        ctx.locator()
            .find_many(&filter, args.search.limit, args.search.product_limit);
    let sent = ctx
        .mediator()
        .enqueue(queue.as_ref(), datasets, args.job.dryrun)
        .await?;

    let verb = if args.job.dryrun { "Would add" } else { "Added" };
    println!("{verb} {sent} messages to {}", args.queue.queue);
    Ok(ExitCode::SUCCESS)
}

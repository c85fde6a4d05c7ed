//! Add-ids-to-queue command - enqueue datasets by id.

use std::io::BufRead;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use futures::{stream, StreamExt};

use eoforge_core::DatasetId;
use eoforge_flow::BatchReport;

use super::{JobArgs, QueueArgs};
use crate::Config;

/// Arguments for the add-ids-to-queue command.
#[derive(Debug, Args)]
pub struct AddIdsToQueueArgs {
    /// Dataset ids. Read one per line from stdin when none are given.
    #[arg(value_name = "ID")]
    pub ids: Vec<DatasetId>,

    /// Queue flags.
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,
}

/// Execute the add-ids-to-queue command.
///
/// Ids that do not resolve to a dataset of the job's products are reported
/// and skipped; the exit code is their count.
///
/// # Errors
///
/// Returns an error if stdin holds an invalid id, the queue cannot be
/// opened or the queue rejects messages.
pub async fn execute(args: AddIdsToQueueArgs, config: &Config) -> Result<ExitCode> {
    let ids = if args.ids.is_empty() {
        read_ids(std::io::stdin().lock())?
    } else {
        args.ids
    };
    let ctx = super::context(config, &args.job, None).await?;
    let queue = ctx.queues()?.queue(&args.queue.queue).await?;

    let mut report = BatchReport::default();
    let mut found = Vec::with_capacity(ids.len());
    let mut lookups = ctx.locator().find_bulk(ids);
    while let Some((id, result)) = lookups.next().await {
        match result {
            Ok(record) => found.push(record),
            Err(e) => {
                tracing::error!(dataset_id = %id, error = %e, "skipping dataset");
                report.failed += 1;
            }
        }
    }

    report.succeeded = ctx
        .mediator()
        .enqueue(queue.as_ref(), stream::iter(found).map(Ok), args.job.dryrun)
        .await?;
    Ok(super::finish(report))
}

/// Parses one id per line, ignoring blank lines.
fn read_ids(input: impl BufRead) -> Result<Vec<DatasetId>> {
    input
        .lines()
        .map(|line| line.context("Failed to read ids"))
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .map(|line| Ok(line?.parse::<DatasetId>()?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_ids_skips_blank_lines() {
        let input = "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10\n\n  \nc6a2a9d4-1f1e-4c4e-8f55-3b0f1d7e2a90\n";
        let ids = read_ids(input.as_bytes()).expect("ids");
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_read_ids_rejects_garbage() {
        assert!(read_ids("not-an-id\n".as_bytes()).is_err());
    }
}

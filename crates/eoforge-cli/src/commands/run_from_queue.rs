//! Run-from-queue command - process queued datasets.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use eoforge_flow::Runner;

use super::{parse_timeout, JobArgs, PublishArgs, QueueArgs};
use crate::Config;

/// Arguments for the run-from-queue command.
#[derive(Debug, Args)]
pub struct RunFromQueueArgs {
    /// Queue flags.
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Stop after this many messages.
    #[arg(long, env = "EOFORGE_LIMIT")]
    pub limit: Option<usize>,

    /// Seconds a received message stays hidden while it is processed.
    #[arg(
        long,
        env = "EOFORGE_QUEUE_TIMEOUT",
        default_value = "600",
        value_parser = parse_timeout
    )]
    pub queue_timeout: Duration,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,

    /// Publishing flags.
    #[command(flatten)]
    pub publish: PublishArgs,
}

/// Execute the run-from-queue command.
///
/// Messages are deleted only after their task succeeds, so failures are
/// redelivered. An access failure stops consumption.
///
/// # Errors
///
/// Returns an error if the job cannot be set up or the queue cannot be
/// read.
pub async fn execute(args: RunFromQueueArgs, config: &Config) -> Result<ExitCode> {
    let ctx = super::context(config, &args.job, args.publish.sns_arn.as_deref()).await?;
    let report = Runner::new(ctx)
        .run_from_queue(&args.queue.queue, args.limit, args.queue_timeout, args.job.dryrun)
        .await?;
    Ok(super::finish(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunFromQueueArgs,
    }

    #[test]
    fn test_queue_timeout_defaults_to_ten_minutes() {
        let cli = TestCli::parse_from(["test", "--config-file", "c.yaml", "--queue", "work"]);
        assert_eq!(cli.args.queue_timeout, Duration::from_secs(600));
        assert_eq!(cli.args.limit, None);
    }

    #[test]
    fn test_queue_timeout_override() {
        let cli = TestCli::parse_from([
            "test",
            "--config-file",
            "c.yaml",
            "--queue",
            "work",
            "--queue-timeout",
            "60",
            "--limit",
            "3",
        ]);
        assert_eq!(cli.args.queue_timeout, Duration::from_secs(60));
        assert_eq!(cli.args.limit, Some(3));
    }
}

//! Redrive-to-queue command - move messages out of a dead-letter queue.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use eoforge_flow::mediator;

use super::{parse_timeout, QueueArgs};
use crate::Config;

/// Arguments for the redrive-to-queue command.
#[derive(Debug, Args)]
pub struct RedriveToQueueArgs {
    /// Queue flags; `--queue` names the dead-letter queue.
    #[command(flatten)]
    pub queue: QueueArgs,

    /// Destination queue. Defaults to the single queue that dead-letters
    /// into `--queue`.
    #[arg(long, env = "EOFORGE_TO_QUEUE")]
    pub to_queue: Option<String>,

    /// Stop after this many messages.
    #[arg(long, env = "EOFORGE_LIMIT")]
    pub limit: Option<usize>,

    /// Seconds a received message stays hidden while it is moved.
    #[arg(
        long,
        env = "EOFORGE_QUEUE_TIMEOUT",
        default_value = "600",
        value_parser = parse_timeout
    )]
    pub queue_timeout: Duration,

    /// Report how many messages would move without moving any.
    #[arg(long, env = "EOFORGE_DRYRUN")]
    pub dryrun: bool,
}

/// Execute the redrive-to-queue command.
///
/// # Errors
///
/// Returns an error if queues are unavailable, the destination cannot be
/// determined, or the destination rejects messages.
pub async fn execute(args: RedriveToQueueArgs, _config: &Config) -> Result<ExitCode> {
    let queues = super::queues()?;
    let moved = mediator::redrive(
        queues.as_ref(),
        &args.queue.queue,
        args.to_queue.as_deref(),
        args.limit,
        args.queue_timeout,
        args.dryrun,
    )
    .await
    .with_context(|| format!("Failed to redrive {}", args.queue.queue))?;

    let verb = if args.dryrun { "Would move" } else { "Moved" };
    println!("{verb} {moved} messages from {}", args.queue.queue);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RedriveToQueueArgs,
    }

    #[test]
    fn test_redrive_needs_no_configuration() {
        let cli = TestCli::parse_from([
            "test",
            "--queue",
            "work-dlq",
            "--to-queue",
            "quarantine",
            "--dryrun",
        ]);
        assert_eq!(cli.args.queue.queue, "work-dlq");
        assert_eq!(cli.args.to_queue.as_deref(), Some("quarantine"));
        assert!(cli.args.dryrun);
    }
}

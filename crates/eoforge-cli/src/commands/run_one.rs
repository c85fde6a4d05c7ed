//! Run-one command - process a single dataset.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use eoforge_core::DatasetId;
use eoforge_flow::Runner;

use super::{JobArgs, PublishArgs};
use crate::Config;

/// Arguments for the run-one command.
#[derive(Debug, Args)]
pub struct RunOneArgs {
    /// Source dataset id.
    #[arg(env = "EOFORGE_ID")]
    pub id: DatasetId,

    /// Job flags.
    #[command(flatten)]
    pub job: JobArgs,

    /// Publishing flags.
    #[command(flatten)]
    pub publish: PublishArgs,
}

/// Execute the run-one command.
///
/// # Errors
///
/// Returns an error if the job cannot be set up or the dataset fails to
/// process; the process then exits with 1.
pub async fn execute(args: RunOneArgs, config: &Config) -> Result<ExitCode> {
    let ctx = super::context(config, &args.job, args.publish.sns_arn.as_deref()).await?;
    let outcome = Runner::new(ctx)
        .run_one(args.id, args.job.dryrun)
        .await
        .with_context(|| format!("Failed to process dataset {}", args.id))?;

    println!("Dataset {} -> {}", outcome.source, outcome.output);
    println!("  Metadata: {}", outcome.published.metadata);
    if args.job.dryrun {
        println!("  (dry run: nothing was written)");
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunOneArgs,
    }

    #[test]
    fn test_run_one_args_parse() {
        let cli = TestCli::parse_from([
            "test",
            "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10",
            "--config-file",
            "https://example.com/ndvi.yaml",
            "--sns-arn",
            "arn:aws:sns:ap-southeast-2:000000000000:outputs",
        ]);
        assert_eq!(
            cli.args.id.to_string(),
            "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10"
        );
        assert!(!cli.args.job.dryrun);
        assert!(cli.args.publish.sns_arn.is_some());
    }

    #[test]
    fn test_run_one_rejects_bad_ids() {
        assert!(TestCli::try_parse_from(["test", "not-a-uuid", "--config-file", "c.yaml"]).is_err());
    }
}

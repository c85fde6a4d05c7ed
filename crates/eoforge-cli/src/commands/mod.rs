//! Command implementations and the wiring they share.

pub mod add_ids_to_queue;
pub mod add_missing_to_queue;
pub mod add_to_queue;
pub mod redrive_to_queue;
pub mod run_from_queue;
pub mod run_many;
pub mod run_one;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use eoforge_core::ConfigLoader;
use eoforge_flow::catalog::{SearchFilter, StacApiCatalog};
use eoforge_flow::dispatch::QueueProvider;
use eoforge_flow::{BatchReport, JobContext};

use crate::Config;

/// Flags shared by every command that runs a job.
#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    /// Job configuration, a local path or `http(s)://` URL.
    #[arg(long, env = "EOFORGE_CONFIG_FILE")]
    pub config_file: String,

    /// Do everything except write outputs, notify or delete messages.
    #[arg(long, env = "EOFORGE_DRYRUN")]
    pub dryrun: bool,
}

/// Flags for commands that publish outputs.
#[derive(Debug, Clone, Args)]
pub struct PublishArgs {
    /// Topic to announce each published output on.
    #[arg(long, env = "EOFORGE_SNS_ARN")]
    pub sns_arn: Option<String>,
}

/// Flags for commands that search the catalog.
#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// Search expressions: `time=2020-01/2020-06`, `bbox=w,s,e,n` or
    /// `property=value`.
    #[arg(value_name = "EXPRESSION")]
    pub expressions: Vec<String>,

    /// Stop after this many datasets.
    #[arg(long, env = "EOFORGE_LIMIT")]
    pub limit: Option<usize>,

    /// Stop after this many datasets from each product.
    #[arg(long, env = "EOFORGE_PRODUCT_LIMIT")]
    pub product_limit: Option<usize>,
}

impl SearchArgs {
    /// Parses the search expressions.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed expressions.
    pub fn filter(&self) -> Result<SearchFilter> {
        SearchFilter::parse_expressions(&self.expressions).context("Invalid search expression")
    }
}

/// Flags naming the work queue.
#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    /// Work queue name.
    #[arg(long, env = "EOFORGE_QUEUE")]
    pub queue: String,
}

/// Parses `--queue-timeout` seconds.
///
/// # Errors
///
/// Returns an error if the value is not a whole number of seconds.
pub fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("expected seconds: {e}"))
}

/// Builds the job context for a command.
///
/// With the `aws` feature and credentials in the environment, outputs can
/// go to S3, queues are SQS, notifications go to SNS and signed S3 reads
/// are used unless the job asks for unsigned access.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or is invalid.
pub async fn context(config: &Config, job: &JobArgs, topic: Option<&str>) -> Result<JobContext> {
    let configuration = ConfigLoader::new()
        .load(&job.config_file)
        .await
        .with_context(|| format!("Failed to load configuration from {}", job.config_file))?;
    tracing::info!(
        transform = %configuration.specification.transform,
        products = ?configuration.input_products(),
        location = %configuration.output.location,
        "configuration loaded"
    );

    let catalog = StacApiCatalog::new(config.catalog_url.clone());
    let ctx = JobContext::new(Arc::new(configuration), Arc::new(catalog));
    with_topic(with_services(ctx), topic)
}

/// Adds the notification topic, refusing one that cannot be notified.
///
/// # Errors
///
/// Returns an error if a topic is given but the context has no notifier.
pub fn with_topic(ctx: JobContext, topic: Option<&str>) -> Result<JobContext> {
    match topic {
        Some(topic) if !ctx.publisher().can_notify() => anyhow::bail!(
            "Cannot notify {topic}: notifications need eoforge built with the `aws` feature and AWS credentials"
        ),
        Some(topic) => Ok(ctx.with_topic(topic)),
        None => Ok(ctx),
    }
}

#[cfg(feature = "aws")]
fn with_services(ctx: JobContext) -> JobContext {
    use eoforge_flow::aws::{AwsConfig, S3Backend, SnsNotifier, SqsQueues};
    use eoforge_flow::publish::Publisher;
    use eoforge_flow::source::GeoTiffSource;

    let aws = match AwsConfig::from_env() {
        Ok(aws) => aws,
        Err(e) => {
            tracing::warn!(error = %e, "AWS credentials unavailable; using local and public access only");
            return ctx;
        }
    };
    let storage = Arc::new(S3Backend::new(aws.clone()));
    let source = GeoTiffSource::new().with_region(aws.region.clone());
    let source = if ctx.config().specification.aws_unsigned {
        source
    } else {
        source.with_storage(storage.clone())
    };
    ctx.with_source(Arc::new(source))
        .with_publisher(
            Publisher::new()
                .with_storage(storage)
                .with_notifier(Arc::new(SnsNotifier::new(aws.clone()))),
        )
        .with_queues(Arc::new(SqsQueues::new(aws)))
}

#[cfg(not(feature = "aws"))]
fn with_services(ctx: JobContext) -> JobContext {
    ctx
}

/// Opens work queues without a job configuration.
///
/// # Errors
///
/// Returns an error if queue access is unavailable.
#[cfg(feature = "aws")]
pub fn queues() -> Result<Arc<dyn QueueProvider>> {
    let aws = eoforge_flow::aws::AwsConfig::from_env().context("Queue access needs AWS credentials")?;
    Ok(Arc::new(eoforge_flow::aws::SqsQueues::new(aws)))
}

/// Opens work queues without a job configuration.
///
/// # Errors
///
/// Always: this build has no queue client.
#[cfg(not(feature = "aws"))]
pub fn queues() -> Result<Arc<dyn QueueProvider>> {
    anyhow::bail!("Queue access needs eoforge built with the `aws` feature")
}

/// Prints a batch summary and converts it to the process exit code.
#[must_use]
pub fn finish(report: BatchReport) -> ExitCode {
    let succeeded = format!("{} succeeded", report.succeeded);
    let failed = format!("{} failed", report.failed);
    if report.failed == 0 {
        println!("{}, {failed}", succeeded.green());
    } else {
        println!("{succeeded}, {}", failed.red());
    }
    if report.halted {
        eprintln!("{}", "Stopped early on an access failure".red());
    }
    exit_code(report)
}

/// The exit code for a batch: its failure count, capped at 255.
#[must_use]
pub fn exit_code(report: BatchReport) -> ExitCode {
    ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(u8::MAX))
}

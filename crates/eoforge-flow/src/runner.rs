//! Running tasks end to end.
//!
//! [`Runner::execute_task`] is the whole pipeline for one task:
//!
//! 1. derive the output identity from the transform's `major.minor` version
//! 2. invoke the transform
//! 3. assemble the package in a scratch directory owned by the task
//! 4. publish it to the task's output location
//!
//! The batch entry points wrap it. `run_many` walks the locator's stream with
//! at most `processing.concurrency` tasks in flight; `run_from_queue` pulls
//! deliveries, acknowledging each one only after it succeeded.
//!
//! ## Failure isolation
//!
//! A failed task is logged and counted; the batch carries on. Systemic
//! failures ([`Error::is_systemic`]) stop queue consumption so that the rest
//! of the queue is not drained into the dead-letter queue by a broken
//! environment.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tracing::Instrument;

use eoforge_core::observability::task_span;
use eoforge_core::DatasetId;

use crate::assembler::assemble;
use crate::catalog::SearchFilter;
use crate::context::JobContext;
use crate::error::{Error, Result};
use crate::mediator::Received;
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::publish::Published;
use crate::task::Task;

/// What one successful task produced.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Source dataset.
    pub source: DatasetId,
    /// Output dataset.
    pub output: DatasetId,
    /// Where and how the output was published.
    pub published: Published,
}

/// Counts from a batch command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Tasks that succeeded.
    pub succeeded: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Whether processing stopped early on a systemic failure.
    pub halted: bool,
}

impl BatchReport {
    /// Tasks attempted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Process exit code: the failure count, capped at 255.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.failed.min(255)).unwrap_or(255)
    }

    fn record(&mut self, source: Option<DatasetId>, result: &Result<TaskOutcome>) {
        match result {
            Ok(outcome) => {
                self.succeeded += 1;
                tracing::info!(
                    source = %outcome.source,
                    output = %outcome.output,
                    location = %outcome.published.metadata,
                    "task succeeded"
                );
            }
            Err(e) => {
                self.failed += 1;
                match source {
                    Some(id) => tracing::error!(dataset_id = %id, error = %e, "task failed"),
                    None => tracing::error!(error = %e, "task failed"),
                }
            }
        }
    }
}

/// Runs tasks of one job.
#[derive(Debug, Clone)]
pub struct Runner {
    ctx: JobContext,
    metrics: FlowMetrics,
}

impl Runner {
    /// Creates a runner.
    #[must_use]
    pub const fn new(ctx: JobContext) -> Self {
        Self {
            ctx,
            metrics: FlowMetrics::new(),
        }
    }

    /// The job context.
    #[must_use]
    pub const fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Runs one task end to end.
    ///
    /// In a dry run the transform reads decimated data and nothing leaves the
    /// scratch directory.
    ///
    /// # Errors
    ///
    /// Returns the first error of any stage.
    pub async fn execute_task(&self, task: &Task, dry_run: bool) -> Result<TaskOutcome> {
        let transform = task.transform_name().to_string();
        let version = self.ctx.registry().version_major_minor(&transform);
        let identity = task.identity(&version)?;
        tracing::debug!(output = %identity.id, tags = ?identity.values(), "output identity");

        let span = task_span("execute", &task.dataset().id.to_string(), &transform);
        let metrics = self.metrics;
        let _timer = TimingGuard::new(|elapsed| {
            metrics.observe_task_duration(&transform, elapsed.as_secs_f64());
        });

        let result = self.pipeline(task, identity, dry_run).instrument(span).await;
        self.metrics
            .record_task(if result.is_ok() { "succeeded" } else { "failed" });
        result
    }

    async fn pipeline(
        &self,
        task: &Task,
        identity: crate::task::TaskIdentity,
        dry_run: bool,
    ) -> Result<TaskOutcome> {
        let invocation = self.ctx.invoker().execute(task, dry_run).await?;
        let info = self
            .ctx
            .registry()
            .info(task.transform_name())
            .cloned()
            .ok_or_else(|| Error::TransformNotFound {
                name: task.transform_name().to_string(),
            })?;

        let scratch = tempfile::Builder::new()
            .prefix("eoforge-")
            .tempdir()
            .map_err(|e| Error::publish_with_source("creating scratch directory", e))?;
        let root = scratch.path().to_path_buf();
        let factory = Arc::clone(self.ctx.assembler());
        let owned = task.clone();
        let package = tokio::task::spawn_blocking(move || {
            assemble(factory.as_ref(), &root, &owned, &identity, &invocation, &info)
        })
        .await??;

        let published = self
            .ctx
            .publisher()
            .publish(&package, task.output_location(), &self.ctx.publish_options(dry_run))
            .await?;
        drop(scratch);

        Ok(TaskOutcome {
            source: task.dataset().id,
            output: package.id,
            published,
        })
    }

    /// Runs the task for one dataset id.
    ///
    /// # Errors
    ///
    /// Returns a locator error if the id cannot be processed by this job, or
    /// the task's error.
    pub async fn run_one(&self, id: DatasetId, dry_run: bool) -> Result<TaskOutcome> {
        let locator = self.ctx.locator();
        let task = locator.task(locator.find_by_id(id).await?);
        self.execute_task(&task, dry_run).await
    }

    /// Runs tasks from a stream with at most `processing.concurrency` in
    /// flight, yielding results in completion order.
    pub fn run_tasks<'a, S>(
        &'a self,
        tasks: S,
        dry_run: bool,
    ) -> impl Stream<Item = (Option<DatasetId>, Result<TaskOutcome>)> + 'a
    where
        S: Stream<Item = Result<Task>> + Send + 'a,
    {
        let concurrency = self.ctx.config().processing.concurrency.unwrap_or(1).max(1);
        tasks
            .map(move |task| async move {
                match task {
                    Ok(task) => {
                        let id = task.dataset().id;
                        (Some(id), self.execute_task(&task, dry_run).await)
                    }
                    Err(e) => (None, Err(e)),
                }
            })
            .buffer_unordered(concurrency)
    }

    /// Runs every dataset matching `filter` in the configured products.
    ///
    /// # Errors
    ///
    /// Individual failures are counted, not returned. The result is always
    /// `Ok` today; the signature leaves room for setup failures.
    pub async fn run_many(
        &self,
        filter: &SearchFilter,
        limit: Option<usize>,
        per_product_limit: Option<usize>,
        dry_run: bool,
    ) -> Result<BatchReport> {
        let locator = self.ctx.locator();
        let tasks = locator
            .find_many(filter, limit, per_product_limit)
            .map(|record| record.map(|r| locator.task(r)));

        let mut report = BatchReport::default();
        let mut results = std::pin::pin!(self.run_tasks(tasks, dry_run));
        while let Some((source, result)) = results.next().await {
            report.record(source, &result);
        }
        tracing::info!(succeeded = report.succeeded, failed = report.failed, "run-many finished");
        Ok(report)
    }

    /// Consumes up to `limit` messages from the named queue.
    ///
    /// Messages are received one at a time, so each task gets the whole
    /// `visibility` lease. Successful tasks are acknowledged (except in a dry
    /// run); failed ones stay in the queue to be retried after `visibility`.
    /// The call ends when the queue has no visible message, when a message
    /// comes back a second time, or on a systemic failure.
    ///
    /// # Errors
    ///
    /// Returns queue errors from opening the queue or receiving. A failed
    /// acknowledgement is logged; the message will be delivered again.
    pub async fn run_from_queue(
        &self,
        queue_name: &str,
        limit: Option<usize>,
        visibility: Duration,
        dry_run: bool,
    ) -> Result<BatchReport> {
        let queue = self.ctx.queues()?.queue(queue_name).await?;
        let mediator = self.ctx.mediator();
        let limit = limit.unwrap_or(usize::MAX);
        let mut report = BatchReport::default();
        let mut seen = HashSet::new();

        while report.total() < limit {
            let Some(received) = mediator.dequeue_one(queue.as_ref(), visibility).await? else {
                break;
            };
            if !seen.insert(received.message_id().to_string()) {
                tracing::debug!(message_id = %received.message_id(), "message came back; stopping");
                break;
            }
            let Received::Delivery(delivery) = received else {
                continue;
            };

            let result = match &delivery.task {
                Ok(task) => self.execute_task(task, dry_run).await,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(message_id = %delivery.message_id, error = %e, "message could not be resolved");
                    if e.is_systemic() {
                        report.halted = true;
                        break;
                    }
                    continue;
                }
            };
            let source = delivery.task.as_ref().ok().map(|task| task.dataset().id);
            report.record(source, &result);
            match result {
                Ok(_) if !dry_run => {
                    if let Err(e) = mediator.acknowledge(queue.as_ref(), &delivery).await {
                        tracing::error!(
                            message_id = %delivery.message_id,
                            error = %e,
                            "acknowledge failed; message will be delivered again"
                        );
                        if e.is_systemic() {
                            report.halted = true;
                            break;
                        }
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_systemic() => {
                    tracing::error!(error = %e, "stopping on systemic failure");
                    report.halted = true;
                    break;
                }
                Err(_) => {}
            }
        }
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            halted = report.halted,
            "run-from-queue finished"
        );
        Ok(report)
    }
}

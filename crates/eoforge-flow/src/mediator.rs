//! Moving tasks through work queues.
//!
//! The mediator sits between the locator and a [`WorkQueue`]:
//!
//! - **Enqueue** sends `{id, transform}` messages in batches of at most
//!   [`MAX_BATCH`]. A dry run counts what would be sent.
//! - **Dequeue** receives messages under a visibility timeout and re-resolves
//!   each one through the locator. Messages produced for another transform
//!   are left in place. Consumers take one message per lease with
//!   [`QueueMediator::dequeue_one`].
//! - **Acknowledge** deletes a message once its task has succeeded.
//! - **Redrive** moves messages between queues, deleting from the source only
//!   what the target confirmed.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};

use eoforge_core::observability::queue_span;
use eoforge_core::DatasetId;
use tracing::Instrument;

use crate::catalog::DatasetRecord;
use crate::dispatch::{
    OutgoingMessage, QueueMessage, QueueProvider, ReceivedMessage, WorkQueue, MAX_BATCH,
};
use crate::error::{Error, Result};
use crate::locator::DatasetLocator;
use crate::metrics::FlowMetrics;
use crate::task::Task;

/// One received message and the task it resolved to.
#[derive(Debug)]
pub struct Delivery {
    /// Queue-assigned message id.
    pub message_id: String,
    /// Receipt used to acknowledge the message.
    pub receipt: String,
    /// The resolved task, or why it could not be resolved.
    pub task: Result<Task>,
}

/// One message taken off a queue.
#[derive(Debug)]
pub enum Received {
    /// A message for this job's transform.
    Delivery(Delivery),
    /// A message for another transform, left in the queue.
    Foreign {
        /// Queue-assigned message id.
        message_id: String,
    },
}

impl Received {
    /// Queue-assigned message id.
    #[must_use]
    pub fn message_id(&self) -> &str {
        match self {
            Self::Delivery(delivery) => &delivery.message_id,
            Self::Foreign { message_id } => message_id,
        }
    }
}

/// Mediates between a job and its work queues.
#[derive(Debug, Clone)]
pub struct QueueMediator {
    locator: DatasetLocator,
    metrics: FlowMetrics,
}

impl QueueMediator {
    /// Creates a mediator for the locator's job.
    #[must_use]
    pub const fn new(locator: DatasetLocator) -> Self {
        Self {
            locator,
            metrics: FlowMetrics::new(),
        }
    }

    /// The locator used to resolve messages.
    #[must_use]
    pub const fn locator(&self) -> &DatasetLocator {
        &self.locator
    }

    fn transform(&self) -> &str {
        &self.locator.config().specification.transform
    }

    /// Sends one message per dataset. Returns the number sent, or that would
    /// have been sent in a dry run.
    ///
    /// # Errors
    ///
    /// Returns the first error of the dataset stream, or [`Error::Queue`] if
    /// a batch is not fully accepted.
    pub async fn enqueue<S>(&self, queue: &dyn WorkQueue, datasets: S, dry_run: bool) -> Result<usize>
    where
        S: Stream<Item = Result<DatasetRecord>> + Send,
    {
        let transform = self.transform().to_string();
        let span = queue_span("enqueue", queue.name());
        async move {
            let mut batches = std::pin::pin!(datasets.chunks(MAX_BATCH));
            let mut count = 0;
            while let Some(batch) = batches.next().await {
                let ids = batch
                    .into_iter()
                    .map(|r| r.map(|record| record.id))
                    .collect::<Result<Vec<DatasetId>>>()?;
                count += self.send_ids(queue, &ids, &transform, dry_run).await?;
            }
            tracing::info!(count, dry_run, "enqueued");
            Ok(count)
        }
        .instrument(span)
        .await
    }

    async fn send_ids(
        &self,
        queue: &dyn WorkQueue,
        ids: &[DatasetId],
        transform: &str,
        dry_run: bool,
    ) -> Result<usize> {
        if dry_run {
            for id in ids {
                tracing::info!(dataset_id = %id, "dry run: would enqueue");
            }
            return Ok(ids.len());
        }
        let messages = ids
            .iter()
            .map(|id| QueueMessage::reference(*id, transform).encode().map(OutgoingMessage::new))
            .collect::<Result<Vec<_>>>()?;
        let result = queue.send_batch(&messages).await?;
        if let Some((index, reason)) = result.failed.first() {
            return Err(Error::queue(format!(
                "{} of {} messages rejected by {} (first: {}: {reason})",
                result.failed.len(),
                messages.len(),
                queue.name(),
                ids[*index]
            )));
        }
        self.metrics.record_enqueued(queue.name(), result.sent.len());
        Ok(result.sent.len())
    }

    /// Receives up to `limit` messages and resolves each to a task.
    ///
    /// Messages for a different transform are logged and left in place: they
    /// are not part of the returned deliveries and become visible again after
    /// `visibility`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if receiving fails. Resolution failures are
    /// reported per delivery.
    pub async fn dequeue(
        &self,
        queue: &dyn WorkQueue,
        limit: usize,
        visibility: Duration,
    ) -> Result<Vec<Delivery>> {
        let received = queue.receive(limit, visibility).await?;
        let mut deliveries = Vec::with_capacity(received.len());
        for msg in received {
            if let Received::Delivery(delivery) = self.resolve(msg).await {
                deliveries.push(delivery);
            }
        }
        Ok(deliveries)
    }

    /// Receives at most one message under its own visibility lease.
    ///
    /// Returns `None` once no message is visible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if receiving fails.
    pub async fn dequeue_one(
        &self,
        queue: &dyn WorkQueue,
        visibility: Duration,
    ) -> Result<Option<Received>> {
        let msg = queue.receive(1, visibility).await?.into_iter().next();
        Ok(match msg {
            Some(msg) => Some(self.resolve(msg).await),
            None => None,
        })
    }

    async fn resolve(&self, msg: ReceivedMessage) -> Received {
        let message = match QueueMessage::decode(&msg.body) {
            Ok(message) => message,
            Err(e) => {
                return Received::Delivery(Delivery {
                    message_id: msg.message_id,
                    receipt: msg.receipt,
                    task: Err(e),
                })
            }
        };
        if message.transform() != self.transform() {
            tracing::error!(
                message_id = %msg.message_id,
                expected = %self.transform(),
                actual = %message.transform(),
                "message is for a different transform; leaving it in the queue"
            );
            return Received::Foreign {
                message_id: msg.message_id,
            };
        }
        let task = match message {
            QueueMessage::Reference { id, .. } => self
                .locator
                .find_by_id(id)
                .await
                .map(|record| self.locator.task(record)),
            QueueMessage::Inline(inline) => {
                tracing::warn!(message_id = %msg.message_id, "legacy inline task message");
                Ok(Task::from(*inline))
            }
        };
        Received::Delivery(Delivery {
            message_id: msg.message_id,
            receipt: msg.receipt,
            task,
        })
    }

    /// Deletes a processed message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if the delete fails.
    pub async fn acknowledge(&self, queue: &dyn WorkQueue, delivery: &Delivery) -> Result<()> {
        queue.delete(&delivery.receipt).await?;
        tracing::debug!(message_id = %delivery.message_id, "acknowledged");
        Ok(())
    }

    /// Moves up to `limit` messages from `from` to `to`.
    ///
    /// Without `to`, the target is the single queue that uses `from` as its
    /// dead-letter queue. A dry run reports how many visible messages would
    /// move without receiving any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if the target cannot be determined, or if
    /// the target rejects messages; rejected messages stay in `from`.
    pub async fn redrive(
        &self,
        queues: &dyn QueueProvider,
        from: &str,
        to: Option<&str>,
        limit: Option<usize>,
        visibility: Duration,
        dry_run: bool,
    ) -> Result<usize> {
        redrive(queues, from, to, limit, visibility, dry_run).await
    }
}

/// Moves messages between queues. See [`QueueMediator::redrive`].
///
/// # Errors
///
/// Returns [`Error::Queue`] if the target cannot be determined or rejects
/// messages.
pub async fn redrive(
    queues: &dyn QueueProvider,
    from: &str,
    to: Option<&str>,
    limit: Option<usize>,
    visibility: Duration,
    dry_run: bool,
) -> Result<usize> {
    let source = queues.queue(from).await?;
    let target_name = match to {
        Some(name) => name.to_string(),
        None => {
            let sources = source.dead_letter_sources().await?;
            match sources.as_slice() {
                [single] => single.clone(),
                [] => {
                    return Err(Error::queue(format!(
                        "{from} is not a dead-letter queue; give a target queue"
                    )))
                }
                many => {
                    return Err(Error::queue(format!(
                        "{from} is the dead-letter queue of {} queues ({}); give a target queue",
                        many.len(),
                        many.join(", ")
                    )))
                }
            }
        }
    };
    let target: Arc<dyn WorkQueue> = queues.queue(&target_name).await?;
    let limit = limit.unwrap_or(usize::MAX);
    let span = queue_span("redrive", from);

    async move {
        if dry_run {
            let depth = source.depth().await?;
            FlowMetrics::new().set_queue_depth(from, depth);
            let count = depth.min(limit);
            tracing::info!(count, target = %target_name, "dry run: would redrive");
            return Ok(count);
        }

        let mut moved = 0;
        while moved < limit {
            let batch = source.receive((limit - moved).min(MAX_BATCH), visibility).await?;
            if batch.is_empty() {
                break;
            }
            let outgoing: Vec<OutgoingMessage> = batch.iter().map(OutgoingMessage::from).collect();
            let result = target.send_batch(&outgoing).await?;
            for index in &result.sent {
                source.delete(&batch[*index].receipt).await?;
            }
            moved += result.sent.len();
            if !result.all_sent() {
                FlowMetrics::new().record_redriven(from, moved);
                return Err(Error::queue(format!(
                    "{} messages rejected by {target_name}; {moved} redriven before stopping",
                    result.failed.len()
                )));
            }
        }
        FlowMetrics::new().record_redriven(from, moved);
        tracing::info!(count = moved, target = %target_name, "redriven");
        Ok(moved)
    }
    .instrument(span)
    .await
}

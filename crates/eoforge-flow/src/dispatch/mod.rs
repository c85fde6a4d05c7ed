//! Work queue abstraction.
//!
//! This module provides:
//!
//! - [`WorkQueue`]: trait for the queue operations task mediation needs
//! - [`QueueMessage`]: the message body, by reference or carrying a whole task
//! - [`QueueProvider`]: opens queues by name, used when redriving
//! - [`InMemoryWorkQueue`]: in-memory queue with visibility timeouts for testing
//!
//! ## Design Principles
//!
//! - **At-least-once**: a received message stays in the queue, invisible for
//!   the visibility timeout, until it is deleted by receipt
//! - **Bounded batches**: at most [`MAX_BATCH`] messages per send or receive
//! - **Per-message outcomes**: batch sends report which entries succeeded so
//!   callers delete only what was confirmed

pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use eoforge_core::DatasetId;

use crate::error::{Error, Result};
use crate::task::InlineTask;

pub use memory::{InMemoryQueues, InMemoryWorkQueue};

/// Largest batch a queue accepts in one call.
pub const MAX_BATCH: usize = 10;

/// Body of a work queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueueMessage {
    /// A dataset to process with a named transform.
    Reference {
        /// Source dataset id.
        id: DatasetId,
        /// Transform the producer configured.
        transform: String,
    },
    /// Legacy form: the dataset and configuration inline.
    Inline(Box<InlineTask>),
}

impl QueueMessage {
    /// A reference message.
    #[must_use]
    pub fn reference(id: DatasetId, transform: impl Into<String>) -> Self {
        Self::Reference {
            id,
            transform: transform.into(),
        }
    }

    /// The transform this message was produced for.
    #[must_use]
    pub fn transform(&self) -> &str {
        match self {
            Self::Reference { transform, .. } => transform,
            Self::Inline(task) => &task.settings.specification.transform,
        }
    }

    /// Encodes the message body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if the body is not a known message form.
    pub fn decode(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| Error::queue(format!("malformed message: {e}")))
    }
}

/// A message to send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    /// Message body.
    pub body: String,
    /// Message attributes.
    pub attributes: BTreeMap<String, String>,
}

impl OutgoingMessage {
    /// A message with no attributes.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// A message handed out by [`WorkQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue-assigned message id.
    pub message_id: String,
    /// Handle for deleting this delivery.
    pub receipt: String,
    /// Message body.
    pub body: String,
    /// Message attributes.
    pub attributes: BTreeMap<String, String>,
    /// How many times the message has been received, this time included.
    pub receive_count: u32,
}

impl From<&ReceivedMessage> for OutgoingMessage {
    fn from(msg: &ReceivedMessage) -> Self {
        Self {
            body: msg.body.clone(),
            attributes: msg.attributes.clone(),
        }
    }
}

/// Per-entry outcome of a batch send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSendResult {
    /// Indexes of entries the queue accepted.
    pub sent: Vec<usize>,
    /// Indexes of rejected entries with the reason.
    pub failed: Vec<(usize, String)>,
}

impl BatchSendResult {
    /// Whether every entry was accepted.
    #[must_use]
    pub fn all_sent(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Queue operations used by the mediator.
///
/// ## Thread Safety
///
/// Implementations are shared behind `Arc<dyn WorkQueue>` and must tolerate
/// concurrent calls.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// The queue's name.
    fn name(&self) -> &str;

    /// Sends up to [`MAX_BATCH`] messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if the batch is too large or the whole call
    /// failed; per-entry rejections are reported in the result.
    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<BatchSendResult>;

    /// Receives up to `limit` (at most [`MAX_BATCH`]) visible messages, hiding
    /// them for `visibility`.
    async fn receive(&self, limit: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>>;

    /// Deletes a received message by its receipt.
    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Approximate number of visible messages.
    async fn depth(&self) -> Result<usize>;

    /// Names of queues that use this queue as their dead-letter queue.
    async fn dead_letter_sources(&self) -> Result<Vec<String>>;
}

/// Opens queues by name.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Returns the named queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Queue`] if no such queue exists.
    async fn queue(&self, name: &str) -> Result<Arc<dyn WorkQueue>>;
}

/// Fails batches larger than [`MAX_BATCH`].
pub(crate) fn check_batch(queue: &str, len: usize) -> Result<()> {
    if len > MAX_BATCH {
        return Err(Error::queue(format!(
            "batch of {len} exceeds the limit of {MAX_BATCH} for {queue}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoforge_core::Configuration;

    #[test]
    fn reference_messages_have_a_stable_shape() {
        let id: DatasetId = "00000000-0000-0000-0000-000000000001".parse().expect("id");
        let body = QueueMessage::reference(id, "ndvi").encode().expect("encode");
        assert_eq!(
            body,
            r#"{"id":"00000000-0000-0000-0000-000000000001","transform":"ndvi"}"#
        );
        assert_eq!(QueueMessage::decode(&body).expect("decode").transform(), "ndvi");
    }

    #[test]
    fn inline_messages_are_accepted() {
        let settings = Configuration::from_yaml_str(
            "specification: {product: p, measurements: [red], transform: passthrough}\noutput: {location: /tmp/out}\n",
        )
        .expect("config");
        let inline = InlineTask {
            dataset: crate::catalog::DatasetRecord::new(DatasetId::generate(), "p"),
            settings,
        };
        let body = serde_json::to_string(&inline).expect("encode");
        let msg = QueueMessage::decode(&body).expect("decode");
        assert!(matches!(msg, QueueMessage::Inline(_)));
        assert_eq!(msg.transform(), "passthrough");
    }

    #[test]
    fn garbage_is_a_queue_error() {
        assert!(matches!(
            QueueMessage::decode("{\"hello\": 1}"),
            Err(Error::Queue { .. })
        ));
    }

    #[test]
    fn oversized_batches_are_rejected() {
        assert!(check_batch("q", MAX_BATCH).is_ok());
        assert!(check_batch("q", MAX_BATCH + 1).is_err());
    }
}

//! In-memory work queues for testing.
//!
//! This module provides [`InMemoryWorkQueue`], a thread-safe implementation
//! of [`WorkQueue`] with real visibility timeouts, and [`InMemoryQueues`], a
//! set of named queues with dead-letter relationships.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no distribution
//! - **Single-process only**: messages are not visible across processes
//! - **No automatic dead-lettering**: messages are never moved by receive count

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ulid::Ulid;

use super::{
    check_batch, BatchSendResult, OutgoingMessage, QueueProvider, ReceivedMessage, WorkQueue,
    MAX_BATCH,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    attributes: BTreeMap<String, String>,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    dead_letter_sources: Vec<String>,
    reject_sends: bool,
    reject_deletes: bool,
}

/// In-memory work queue for testing.
///
/// ## Example
///
/// ```rust
/// use eoforge_flow::dispatch::InMemoryWorkQueue;
///
/// let queue = InMemoryWorkQueue::new("tasks");
/// ```
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    name: String,
    state: RwLock<QueueState>,
}

/// Converts a lock poison error to a queue error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::queue("work queue lock poisoned")
}

impl InMemoryWorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Bodies of every message, visible or not, in queue order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn bodies(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.messages.iter().map(|m| m.body.clone()).collect())
    }

    /// Number of messages, visible or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.messages.len())
    }

    /// Whether the queue holds no messages at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Makes every later send reject all entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn reject_sends(&self, reject: bool) -> Result<()> {
        self.state.write().map_err(poison_err)?.reject_sends = reject;
        Ok(())
    }

    /// Makes every later delete fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn reject_deletes(&self, reject: bool) -> Result<()> {
        self.state.write().map_err(poison_err)?.reject_deletes = reject;
        Ok(())
    }

    fn add_dead_letter_source(&self, source: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.dead_letter_sources.iter().any(|s| s == source) {
            state.dead_letter_sources.push(source.to_string());
        }
        drop(state);
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_batch(&self, messages: &[OutgoingMessage]) -> Result<BatchSendResult> {
        check_batch(&self.name, messages.len())?;
        let mut state = self.state.write().map_err(poison_err)?;
        let mut result = BatchSendResult::default();
        for (i, msg) in messages.iter().enumerate() {
            if state.reject_sends {
                result.failed.push((i, "send rejected".to_string()));
                continue;
            }
            state.messages.push_back(StoredMessage {
                message_id: Ulid::new().to_string(),
                body: msg.body.clone(),
                attributes: msg.attributes.clone(),
                receipt: None,
                invisible_until: None,
                receive_count: 0,
            });
            result.sent.push(i);
        }
        drop(state);
        Ok(result)
    }

    async fn receive(&self, limit: usize, visibility: Duration) -> Result<Vec<ReceivedMessage>> {
        let now = Instant::now();
        let mut state = self.state.write().map_err(poison_err)?;
        let limit = limit.min(MAX_BATCH);
        let mut taken = Vec::new();
        let mut received = Vec::new();
        let mut kept = VecDeque::with_capacity(state.messages.len());
        for mut msg in state.messages.drain(..) {
            if taken.len() < limit && msg.is_visible(now) {
                let receipt = Ulid::new().to_string();
                msg.receipt = Some(receipt.clone());
                msg.invisible_until = Some(now + visibility);
                msg.receive_count += 1;
                received.push(ReceivedMessage {
                    message_id: msg.message_id.clone(),
                    receipt,
                    body: msg.body.clone(),
                    attributes: msg.attributes.clone(),
                    receive_count: msg.receive_count,
                });
                taken.push(msg);
            } else {
                kept.push_back(msg);
            }
        }
        // Received messages go to the back, so a message that keeps failing
        // does not starve the rest of the queue.
        kept.extend(taken);
        state.messages = kept;
        drop(state);
        Ok(received)
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if state.reject_deletes {
            return Err(Error::queue(format!("delete rejected by {}", self.name)));
        }
        let position = state
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| Error::queue(format!("unknown receipt handle for {}", self.name)))?;
        state.messages.remove(position);
        drop(state);
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let now = Instant::now();
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.messages.iter().filter(|m| m.is_visible(now)).count())
    }

    async fn dead_letter_sources(&self) -> Result<Vec<String>> {
        Ok(self.state.read().map_err(poison_err)?.dead_letter_sources.clone())
    }
}

/// Named in-memory queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueues {
    queues: Arc<RwLock<HashMap<String, Arc<InMemoryWorkQueue>>>>,
}

impl InMemoryQueues {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the named queue, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn create(&self, name: &str) -> Result<Arc<InMemoryWorkQueue>> {
        let mut queues = self.queues.write().map_err(poison_err)?;
        Ok(Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(InMemoryWorkQueue::new(name))),
        ))
    }

    /// Registers `dead_letter` as the dead-letter queue of `source`, creating
    /// both.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn link_dead_letter(&self, source: &str, dead_letter: &str) -> Result<()> {
        self.create(source)?;
        self.create(dead_letter)?.add_dead_letter_source(source)
    }
}

#[async_trait]
impl QueueProvider for InMemoryQueues {
    async fn queue(&self, name: &str) -> Result<Arc<dyn WorkQueue>> {
        let queues = self.queues.read().map_err(poison_err)?;
        queues
            .get(name)
            .map(|q| Arc::clone(q) as Arc<dyn WorkQueue>)
            .ok_or_else(|| Error::queue(format!("queue not found: {name}")))
    }
}

//! Task and queue metrics.
//!
//! Recorded through the `metrics` facade; without an installed recorder every
//! call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `eoforge_tasks_total` | Counter | `result` | Finished tasks by outcome |
//! | `eoforge_task_duration_seconds` | Histogram | `transform` | End-to-end task time |
//! | `eoforge_stage_transitions_total` | Counter | `from_state`, `to_state` | Invoker stage changes |
//! | `eoforge_messages_enqueued_total` | Counter | `queue` | Messages sent to a work queue |
//! | `eoforge_messages_redriven_total` | Counter | `queue` | Messages moved between queues |
//! | `eoforge_queue_depth` | Gauge | `queue` | Approximate visible messages |
//! | `eoforge_files_published_total` | Counter | - | Files copied or uploaded |
//!
//! ## Usage
//!
//! ```rust
//! use eoforge_flow::metrics::FlowMetrics;
//!
//! let metrics = FlowMetrics::new();
//! metrics.record_task("succeeded");
//! metrics.observe_task_duration("ndvi", 12.5);
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: finished tasks.
    pub const TASKS_TOTAL: &str = "eoforge_tasks_total";
    /// Histogram: task duration in seconds.
    pub const TASK_DURATION_SECONDS: &str = "eoforge_task_duration_seconds";
    /// Counter: invoker stage transitions.
    pub const STAGE_TRANSITIONS_TOTAL: &str = "eoforge_stage_transitions_total";
    /// Counter: messages enqueued.
    pub const MESSAGES_ENQUEUED_TOTAL: &str = "eoforge_messages_enqueued_total";
    /// Counter: messages redriven.
    pub const MESSAGES_REDRIVEN_TOTAL: &str = "eoforge_messages_redriven_total";
    /// Gauge: approximate queue depth.
    pub const QUEUE_DEPTH: &str = "eoforge_queue_depth";
    /// Counter: files relocated to a destination.
    pub const FILES_PUBLISHED_TOTAL: &str = "eoforge_files_published_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Task outcome (succeeded, failed).
    pub const RESULT: &str = "result";
    /// Transform name.
    pub const TRANSFORM: &str = "transform";
    /// Previous stage.
    pub const FROM_STATE: &str = "from_state";
    /// Next stage.
    pub const TO_STATE: &str = "to_state";
    /// Queue name.
    pub const QUEUE: &str = "queue";
}

/// Records task and queue metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts a finished task.
    pub fn record_task(&self, result: &str) {
        counter!(names::TASKS_TOTAL, labels::RESULT => result.to_string()).increment(1);
    }

    /// Records how long a task took.
    pub fn observe_task_duration(&self, transform: &str, duration_secs: f64) {
        histogram!(names::TASK_DURATION_SECONDS, labels::TRANSFORM => transform.to_string())
            .record(duration_secs);
    }

    /// Counts an invoker stage transition.
    pub fn record_stage_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::STAGE_TRANSITIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Counts messages sent to a queue.
    pub fn record_enqueued(&self, queue: &str, count: usize) {
        counter!(names::MESSAGES_ENQUEUED_TOTAL, labels::QUEUE => queue.to_string())
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Counts messages moved off a queue.
    pub fn record_redriven(&self, queue: &str, count: usize) {
        counter!(names::MESSAGES_REDRIVEN_TOTAL, labels::QUEUE => queue.to_string())
            .increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Sets a queue's approximate depth.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        gauge!(names::QUEUE_DEPTH, labels::QUEUE => queue.to_string()).set(depth as f64);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust
/// use eoforge_flow::metrics::{FlowMetrics, TimingGuard};
///
/// let metrics = FlowMetrics::new();
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_task_duration("ndvi", duration.as_secs_f64());
///     });
///     // Do work...
/// }
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that calls `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

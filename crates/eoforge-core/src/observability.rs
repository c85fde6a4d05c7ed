//! Observability infrastructure for eoforge.
//!
//! Structured logging with consistent spans. Every task runs inside a
//! [`task_span`] so log lines carry the dataset id and transform name.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops. Logs go to stderr so command output on
/// stdout stays machine readable.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `eoforge_flow=debug`)
///
/// # Example
///
/// ```rust
/// use eoforge_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty().with_writer(std::io::stderr))
                    .init();
            }
        }
    });
}

/// Creates a span for one task execution.
///
/// # Example
///
/// ```rust
/// use eoforge_core::observability::task_span;
///
/// let span = task_span("execute", "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10", "ndvi");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn task_span(operation: &str, dataset_id: &str, transform: &str) -> Span {
    tracing::info_span!(
        "task",
        op = operation,
        dataset_id = dataset_id,
        transform = transform,
    )
}

/// Creates a span for queue operations.
#[must_use]
pub fn queue_span(operation: &str, queue: &str) -> Span {
    tracing::info_span!("queue", op = operation, queue = queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = task_span("execute", "00000000-0000-0000-0000-000000000001", "ndvi");
        let _guard = span.enter();
        tracing::info!("task message");

        let span = queue_span("receive", "alchemy-jobs");
        let _guard = span.enter();
        tracing::info!("queue message");
    }
}

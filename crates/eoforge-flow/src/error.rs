//! Error types for task execution and queue mediation.
//!
//! The enum is closed: every failure a task can hit maps to exactly one
//! variant, and the batch loops decide what to do from the variant alone.
//! [`Error::is_systemic`] marks failures that mean the environment itself is
//! broken (credentials, permissions), where continuing would only repeat the
//! failure for every remaining message.

use eoforge_core::DatasetId;

/// The result type used throughout eoforge-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while locating, executing or publishing tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The job configuration is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A dataset id did not resolve in the catalog.
    #[error("dataset not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: DatasetId,
    },

    /// A dataset exists but belongs to a product the job does not process.
    #[error("dataset {id} belongs to product {actual}, expected one of {expected:?}")]
    WrongProduct {
        /// The dataset id.
        id: DatasetId,
        /// The dataset's product.
        actual: String,
        /// Products the job is configured for.
        expected: Vec<String>,
    },

    /// A dataset exists but has been archived.
    #[error("dataset {id} is archived")]
    Archived {
        /// The dataset id.
        id: DatasetId,
    },

    /// No transform is registered under the configured name.
    #[error("transform not found: {name}")]
    TransformNotFound {
        /// The requested transform name.
        name: String,
    },

    /// A transform produced output that disagrees with what it declared.
    #[error("transform {name} violated its contract: {message}")]
    TransformContractViolation {
        /// The transform name.
        name: String,
        /// What was declared versus what was produced.
        message: String,
    },

    /// Loading source data or computing the transform failed.
    #[error("transform execution failed: {message}")]
    TransformExecution {
        /// Description of the failure.
        message: String,
    },

    /// Assembling or relocating the output package failed.
    #[error("publish failed: {message}")]
    Publish {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Credentials were rejected or a permission was missing.
    #[error("access denied: {message}")]
    AccessDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A work queue operation failed.
    #[error("queue error: {message}")]
    Queue {
        /// Description of the failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from eoforge-core that has no more specific classification.
    #[error("core error: {0}")]
    Core(eoforge_core::Error),
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new transform execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::TransformExecution {
            message: message.into(),
        }
    }

    /// Creates a new publish error.
    #[must_use]
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new publish error with a source.
    #[must_use]
    pub fn publish_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Publish {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new queue error.
    #[must_use]
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Creates a new access-denied error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether the failure points at the environment rather than the task.
    ///
    /// Queue consumption stops on the first systemic failure.
    #[must_use]
    pub const fn is_systemic(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }

    /// Whether running the same task again could succeed.
    ///
    /// Configuration and transform resolution failures are permanent.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration { .. }
                | Self::TransformNotFound { .. }
                | Self::TransformContractViolation { .. }
                | Self::WrongProduct { .. }
                | Self::Archived { .. }
        )
    }
}

impl From<eoforge_core::Error> for Error {
    fn from(err: eoforge_core::Error) -> Self {
        use eoforge_core::Error as Core;
        match err {
            Core::Configuration { message } => Self::Configuration { message },
            Core::KeyNotFound { path } => Self::Configuration {
                message: format!("key not found: {path}"),
            },
            Core::AccessDenied { message } => Self::AccessDenied { message },
            Core::Storage { message, source } => Self::Storage { message, source },
            Core::Serialization { message } => Self::Serialization { message },
            other => Self::Core(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        eoforge_core::Error::from(err).into()
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::execution(format!("worker task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn wrong_product_display() {
        let err = Error::WrongProduct {
            id: DatasetId::generate(),
            actual: "ga_s2am_ard_3".into(),
            expected: vec!["ga_ls8c_ard_3".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ga_s2am_ard_3"));
        assert!(msg.contains("ga_ls8c_ard_3"));
    }

    #[test]
    fn core_errors_are_reclassified() {
        let err: Error = eoforge_core::Error::configuration("bad yaml").into();
        assert!(matches!(err, Error::Configuration { .. }));

        let err: Error = eoforge_core::Error::access_denied("403").into();
        assert!(err.is_systemic());

        let err: Error = eoforge_core::Error::InvalidInput("x".into()).into();
        assert!(matches!(err, Error::Core(_)));
    }

    #[test]
    fn io_permission_errors_are_systemic() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert!(Error::from(io).is_systemic());
    }

    #[test]
    fn retryability() {
        assert!(!Error::configuration("x").is_retryable());
        assert!(!Error::TransformNotFound { name: "x".into() }.is_retryable());
        assert!(Error::execution("read timeout").is_retryable());
        assert!(Error::queue("throttled").is_retryable());
        assert!(!Error::queue("throttled").is_systemic());
    }

    #[test]
    fn publish_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::publish_with_source("failed to copy package", source);
        assert!(err.to_string().contains("publish failed"));
        assert!(StdError::source(&err).is_some());
    }
}

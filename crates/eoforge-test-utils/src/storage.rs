//! Test storage with operation tracing.
//!
//! Wraps [`MemoryBackend`] and records every call for test assertions.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use eoforge_core::error::{Error, Result};
use eoforge_core::storage::{CannedAcl, MemoryBackend, ObjectMeta, PutOptions, StorageBackend};
use eoforge_core::ObjectUrl;

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Object that was read.
        url: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Object that was checked.
        url: String,
    },
    /// Put operation.
    Put {
        /// Object that was written.
        url: String,
        /// Size of data written.
        size: usize,
        /// ACL requested.
        acl: Option<CannedAcl>,
    },
    /// Delete operation.
    Delete {
        /// Object that was deleted.
        url: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_prefixes: Arc<Mutex<Vec<String>>>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Number of recorded uploads.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, StorageOp::Put { .. }))
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every call under `prefix` (an `s3://` URL prefix) fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_prefixes.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_prefixes.lock().expect("lock").clear();
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, url: &str) -> Result<()> {
        let prefixes = self.fail_prefixes.lock().expect("lock");
        if prefixes.iter().any(|p| url.starts_with(p)) {
            return Err(Error::storage(format!("injected failure for {url}")));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, url: &ObjectUrl) -> Result<Bytes> {
        self.check_failure(&url.to_string())?;
        self.record(StorageOp::Get {
            url: url.to_string(),
        });
        self.inner.get(url).await
    }

    async fn put(&self, url: &ObjectUrl, data: Bytes, options: &PutOptions) -> Result<()> {
        self.check_failure(&url.to_string())?;
        self.record(StorageOp::Put {
            url: url.to_string(),
            size: data.len(),
            acl: options.acl,
        });
        self.inner.put(url, data, options).await
    }

    async fn delete(&self, url: &ObjectUrl) -> Result<()> {
        self.check_failure(&url.to_string())?;
        self.record(StorageOp::Delete {
            url: url.to_string(),
        });
        self.inner.delete(url).await
    }

    async fn list(&self, prefix: &ObjectUrl) -> Result<Vec<ObjectMeta>> {
        self.check_failure(&prefix.to_string())?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.inner.list(prefix).await
    }

    async fn head(&self, url: &ObjectUrl) -> Result<Option<ObjectMeta>> {
        self.check_failure(&url.to_string())?;
        self.record(StorageOp::Head {
            url: url.to_string(),
        });
        self.inner.head(url).await
    }
}

//! Object storage abstraction.
//!
//! Output packages destined for object storage are synced through a
//! [`StorageBackend`]. The contract is the minimum a sync needs:
//! whole-object reads and writes, listings with checksums, and deletes.
//!
//! ## Checksums
//!
//! Every [`ObjectMeta`] carries the SHA-256 of the object body when the
//! backend knows it. Sync compares it with the local file's digest and skips
//! the upload on a match, which makes re-publishing the same package a no-op.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::location::ObjectUrl;

/// Canned access control applied on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    /// Only the owner has access.
    Private,
    /// The bucket owner gets full control of objects written by others.
    BucketOwnerFullControl,
}

impl CannedAcl {
    /// The wire value of the ACL.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

/// Options for a single upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Canned ACL, if any.
    pub acl: Option<CannedAcl>,
    /// MIME type of the body.
    pub content_type: Option<String>,
}

impl PutOptions {
    /// Sets the canned ACL.
    #[must_use]
    pub fn with_acl(mut self, acl: CannedAcl) -> Self {
        self.acl = Some(acl);
        self
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object address.
    pub url: ObjectUrl,
    /// Object size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the body, when known.
    pub sha256: Option<String>,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, url: &ObjectUrl) -> Result<Bytes>;

    /// Writes an object, replacing any previous body.
    async fn put(&self, url: &ObjectUrl, data: Bytes, options: &PutOptions) -> Result<()>;

    /// Deletes an object. Succeeds if the object doesn't exist.
    async fn delete(&self, url: &ObjectUrl) -> Result<()>;

    /// Lists objects under a prefix, in arbitrary order.
    async fn list(&self, prefix: &ObjectUrl) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, url: &ObjectUrl) -> Result<Option<ObjectMeta>>;
}

/// Hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<ObjectUrl, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    sha256: String,
    acl: Option<CannedAcl>,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, url: &ObjectUrl) -> ObjectMeta {
        ObjectMeta {
            url: url.clone(),
            size: self.data.len() as u64,
            sha256: Some(self.sha256.clone()),
            last_modified: Some(self.last_modified),
        }
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ACL the object was last written with.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn acl_of(&self, url: &ObjectUrl) -> Result<Option<CannedAcl>> {
        let objects = self.objects.read().map_err(|_| poison_err())?;
        Ok(objects.get(url).and_then(|o| o.acl))
    }

    /// Number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poison_err())?.len())
    }

    /// Whether the backend holds no objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn poison_err() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, url: &ObjectUrl) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poison_err())?;
        objects
            .get(url)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {url}")))
    }

    async fn put(&self, url: &ObjectUrl, data: Bytes, options: &PutOptions) -> Result<()> {
        let stored = StoredObject {
            sha256: sha256_hex(&data),
            data,
            acl: options.acl,
            last_modified: Utc::now(),
        };
        self.objects
            .write()
            .map_err(|_| poison_err())?
            .insert(url.clone(), stored);
        Ok(())
    }

    async fn delete(&self, url: &ObjectUrl) -> Result<()> {
        self.objects.write().map_err(|_| poison_err())?.remove(url);
        Ok(())
    }

    async fn list(&self, prefix: &ObjectUrl) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poison_err())?;
        Ok(objects
            .iter()
            .filter(|(url, _)| url.bucket() == prefix.bucket() && url.key().starts_with(prefix.key()))
            .map(|(url, obj)| obj.meta(url))
            .collect())
    }

    async fn head(&self, url: &ObjectUrl) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poison_err())?;
        Ok(objects.get(url).map(|obj| obj.meta(url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(key: &str) -> ObjectUrl {
        ObjectUrl::new("bucket", key)
    }

    #[tokio::test]
    async fn memory_backend_roundtrip() -> Result<()> {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        backend.put(&url("a/file.txt"), data.clone(), &PutOptions::default()).await?;
        assert_eq!(backend.get(&url("a/file.txt")).await?, data);
        Ok(())
    }

    #[tokio::test]
    async fn head_reports_size_and_checksum() -> Result<()> {
        let backend = MemoryBackend::new();
        backend.put(&url("x.txt"), Bytes::from("data"), &PutOptions::default()).await?;

        let meta = backend.head(&url("x.txt")).await?.expect("object should exist");
        assert_eq!(meta.size, 4);
        assert_eq!(meta.sha256.as_deref(), Some(sha256_hex(b"data").as_str()));
        assert!(meta.last_modified.is_some());

        assert!(backend.head(&url("missing")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend.get(&url("nope")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_bucket_and_prefix() -> Result<()> {
        let backend = MemoryBackend::new();
        let opts = PutOptions::default();
        backend.put(&url("out/a.tif"), Bytes::from("a"), &opts).await?;
        backend.put(&url("out/b.tif"), Bytes::from("b"), &opts).await?;
        backend.put(&url("other/c.tif"), Bytes::from("c"), &opts).await?;
        backend
            .put(&ObjectUrl::new("elsewhere", "out/d.tif"), Bytes::from("d"), &opts)
            .await?;

        let mut keys: Vec<String> = backend
            .list(&url("out"))
            .await?
            .into_iter()
            .map(|m| m.url.key().to_string())
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["out/a.tif", "out/b.tif"]);
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_acl_is_recorded() -> Result<()> {
        let backend = MemoryBackend::new();
        let opts = PutOptions::default().with_acl(CannedAcl::BucketOwnerFullControl);
        backend.put(&url("k"), Bytes::from("v"), &opts).await?;
        assert_eq!(backend.acl_of(&url("k"))?, Some(CannedAcl::BucketOwnerFullControl));

        backend.delete(&url("k")).await?;
        backend.delete(&url("k")).await?;
        assert!(backend.is_empty()?);
        Ok(())
    }

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

//! Relocating assembled packages to their destination.
//!
//! ## Destinations
//!
//! The configured output location is classified once: an `s3://` URL is
//! synced through the [`StorageBackend`], anything else is a local directory.
//!
//! - **Local**: an existing package folder is removed and replaced; every
//!   copied file is verified by size and SHA-256.
//! - **Remote**: files whose SHA-256 already matches the stored object are
//!   skipped, the rest are uploaded with `bucket-owner-full-control`.
//!   Publishing the same package twice uploads nothing the second time.
//!
//! ## Guarantees
//!
//! - The STAC item is generated only after the package is complete and is
//!   written into the package folder before relocation.
//! - A dry run writes the STAC item in scratch but never relocates or
//!   notifies.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use eoforge_core::storage::sha256_hex;
use eoforge_core::{CannedAcl, Location, ObjectUrl, PutOptions, StorageBackend};

use crate::assembler::AssembledPackage;
use crate::error::{Error, Result};
use crate::stac::{self, Notifier, StacItem};

/// Per-task publishing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Skip relocation and notification.
    pub dry_run: bool,
    /// Write a STAC item even when nothing is notified.
    pub write_stac: bool,
    /// Explorer base URL for STAC links.
    pub explorer_url: Option<String>,
    /// Topic to notify about the new output.
    pub topic: Option<String>,
}

/// What publishing did.
#[derive(Debug, Clone)]
pub struct Published {
    /// Final package folder.
    pub location: Location,
    /// Final dataset document location.
    pub metadata: Location,
    /// The STAC item, when one was written.
    pub item: Option<StacItem>,
    /// Files copied or uploaded.
    pub transferred: usize,
    /// Files already present with the same checksum.
    pub unchanged: usize,
    /// Whether the package was relocated.
    pub relocated: bool,
    /// Whether a notification was sent.
    pub notified: bool,
}

/// Moves packages from scratch to their destination.
#[derive(Clone, Default)]
pub struct Publisher {
    storage: Option<Arc<dyn StorageBackend>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("storage", &self.storage.is_some())
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

impl Publisher {
    /// A publisher for local destinations only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `storage` for `s3://` destinations.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sends notifications through `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Whether notifications can be sent.
    #[must_use]
    pub fn can_notify(&self) -> bool {
        self.notifier.is_some()
    }

    /// Publishes a package under `output_location`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a topic is set but no notifier is
    /// configured, [`Error::Publish`] if a file cannot be read, written,
    /// copied or verified, [`Error::Storage`] or [`Error::AccessDenied`] from
    /// the storage backend, or a notifier error.
    pub async fn publish(
        &self,
        package: &AssembledPackage,
        output_location: &str,
        options: &PublishOptions,
    ) -> Result<Published> {
        if let (Some(topic), false) = (&options.topic, self.can_notify()) {
            return Err(Error::configuration(format!(
                "topic {topic} is set but no notifier is configured"
            )));
        }
        let location = Location::classify(output_location).join(&package.names.folder);
        let metadata = location.join(&package.metadata_file);
        let mut files = package.files.clone();

        let item = if options.write_stac || options.topic.is_some() {
            let stac_file = package.stac_file();
            let item = stac::item_from_document(
                &package.document,
                &location.to_string(),
                &package.metadata_file,
                &stac_file,
                options.explorer_url.as_deref(),
            );
            let json = serde_json::to_vec_pretty(&item)?;
            let path = package.dir().join(&stac_file);
            tokio::fs::write(&path, json).await.map_err(|e| {
                Error::publish_with_source(format!("writing {}", path.display()), e)
            })?;
            files.push(stac_file);
            Some(item)
        } else {
            None
        };

        let mut published = Published {
            location: location.clone(),
            metadata,
            item,
            transferred: 0,
            unchanged: 0,
            relocated: false,
            notified: false,
        };
        if options.dry_run {
            tracing::info!(
                dataset_id = %package.id,
                destination = %location,
                "dry run: package left in scratch"
            );
            return Ok(published);
        }

        let (transferred, unchanged) = match &location {
            Location::Local(dest) => (relocate_local(&package.dir(), dest, &files).await?, 0),
            Location::Object(prefix) => {
                let storage = self.storage.as_ref().ok_or_else(|| {
                    Error::configuration(format!("no object storage configured for {prefix}"))
                })?;
                sync_remote(storage.as_ref(), &package.dir(), prefix, &files).await?
            }
        };
        published.transferred = transferred;
        published.unchanged = unchanged;
        published.relocated = true;
        tracing::info!(
            dataset_id = %package.id,
            destination = %location,
            transferred,
            unchanged,
            "package published"
        );
        metrics::counter!(crate::metrics::names::FILES_PUBLISHED_TOTAL)
            .increment(u64::try_from(transferred).unwrap_or(u64::MAX));

        if let (Some(topic), Some(item), Some(notifier)) =
            (&options.topic, &published.item, &self.notifier)
        {
            let message = serde_json::to_string(item)?;
            notifier
                .notify(topic, &message, &stac::notification_attributes(item))
                .await?;
            published.notified = true;
        }
        Ok(published)
    }
}

/// Copies a package folder, replacing any existing one. Returns the number
/// of files copied.
async fn relocate_local(src: &Path, dest: &Path, files: &[String]) -> Result<usize> {
    let exists = tokio::fs::try_exists(dest)
        .await
        .map_err(|e| Error::publish_with_source(format!("checking {}", dest.display()), e))?;
    if exists {
        tracing::info!(destination = %dest.display(), "replacing existing package");
        tokio::fs::remove_dir_all(dest).await.map_err(|e| {
            Error::publish_with_source(format!("removing {}", dest.display()), e)
        })?;
    }
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| Error::publish_with_source(format!("creating {}", dest.display()), e))?;

    for file in files {
        let from = src.join(file);
        let to = dest.join(file);
        let expected = tokio::fs::read(&from)
            .await
            .map_err(|e| Error::publish_with_source(format!("reading {}", from.display()), e))?;
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| Error::publish_with_source(format!("copying {file}"), e))?;
        let copied = tokio::fs::read(&to)
            .await
            .map_err(|e| Error::publish_with_source(format!("reading back {}", to.display()), e))?;
        if copied.len() != expected.len() || sha256_hex(&copied) != sha256_hex(&expected) {
            return Err(Error::publish(format!(
                "verification failed for {}",
                to.display()
            )));
        }
    }
    Ok(files.len())
}

/// Uploads files whose checksum differs from the stored object. Returns
/// `(uploaded, unchanged)`.
async fn sync_remote(
    storage: &dyn StorageBackend,
    src: &Path,
    prefix: &ObjectUrl,
    files: &[String],
) -> Result<(usize, usize)> {
    let (mut uploaded, mut unchanged) = (0, 0);
    for file in files {
        let path = src.join(file);
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::publish_with_source(format!("reading {}", path.display()), e))?;
        let digest = sha256_hex(&body);
        let url = prefix.join(file);
        if storage
            .head(&url)
            .await?
            .is_some_and(|meta| meta.sha256.as_deref() == Some(digest.as_str()))
        {
            unchanged += 1;
            continue;
        }
        let options = PutOptions::default()
            .with_acl(CannedAcl::BucketOwnerFullControl)
            .with_content_type(content_type(file));
        storage.put(&url, Bytes::from(body), &options).await?;
        tracing::debug!(url = %url, "uploaded");
        uploaded += 1;
    }
    Ok((uploaded, unchanged))
}

fn content_type(file: &str) -> &'static str {
    match Path::new(file).extension().and_then(|e| e.to_str()) {
        Some("tif" | "tiff") => "image/tiff",
        Some("yaml" | "yml") => "text/yaml",
        Some("json") => "application/json",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{AssemblerFactory, Eo3Assembler, NamingConventions};
    use crate::catalog::DatasetRecord;
    use crate::raster::{Affine, Band, BandData, GeoBox, RasterDataset};
    use crate::stac::MemoryNotifier;
    use eoforge_core::config::WriteOptions;
    use eoforge_core::{DatasetId, MemoryBackend};
    use ndarray::arr2;

    fn package(dir: &Path) -> Result<AssembledPackage> {
        let source = DatasetRecord::new(DatasetId::generate(), "ga_ls8c_ard_3")
            .with_property("datetime", "2020-05-17T00:00:00Z")
            .with_property("odc:region_code", "090084")
            .with_property("dea:dataset_maturity", "final");
        let data = RasterDataset::new(GeoBox::new(2, 1, Affine::north_up(0.0, 0.0, 10.0, 10.0)))
            .with_band("b", Band::new(BandData::Uint8(arr2(&[[1_u8, 2]]).into_dyn())));
        let mut session = Eo3Assembler.begin(dir, DatasetId::generate(), NamingConventions::Dea);
        session.add_source(&source, true);
        session.write_measurements(&data, None, &WriteOptions::default())?;
        session.done()
    }

    #[tokio::test]
    async fn local_publish_replaces_existing_package() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let dest = out.path().join(&package.names.folder);
        std::fs::create_dir_all(&dest)?;
        std::fs::write(dest.join("stale.txt"), b"old")?;

        let published = Publisher::new()
            .publish(&package, out.path().to_str().expect("utf8"), &PublishOptions::default())
            .await?;
        assert!(published.relocated);
        assert_eq!(published.transferred, package.files.len());
        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join(&package.metadata_file).exists());
        Ok(())
    }

    #[tokio::test]
    async fn remote_publish_is_idempotent() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let storage = Arc::new(MemoryBackend::new());
        let publisher = Publisher::new().with_storage(storage.clone());

        let first = publisher
            .publish(&package, "s3://bucket/out", &PublishOptions::default())
            .await?;
        assert_eq!((first.transferred, first.unchanged), (package.files.len(), 0));

        let second = publisher
            .publish(&package, "s3://bucket/out", &PublishOptions::default())
            .await?;
        assert_eq!((second.transferred, second.unchanged), (0, package.files.len()));

        let url = ObjectUrl::new("bucket", format!("out/{}/{}", package.names.folder, package.metadata_file));
        assert_eq!(storage.acl_of(&url)?, Some(CannedAcl::BucketOwnerFullControl));
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_writes_stac_but_does_not_relocate_or_notify() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let notifier = Arc::new(MemoryNotifier::new());
        let options = PublishOptions {
            dry_run: true,
            topic: Some("topic".into()),
            ..PublishOptions::default()
        };

        let published = Publisher::new()
            .with_notifier(notifier.clone())
            .publish(&package, out.path().to_str().expect("utf8"), &options)
            .await?;
        assert!(!published.relocated);
        assert!(published.item.is_some());
        assert!(package.dir().join(package.stac_file()).exists());
        assert!(std::fs::read_dir(out.path())?.next().is_none());
        assert!(notifier.sent()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn notification_follows_publish() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let notifier = Arc::new(MemoryNotifier::new());
        let options = PublishOptions {
            topic: Some("arn:aws:sns:ap-southeast-2:000000000000:outputs".into()),
            ..PublishOptions::default()
        };

        let published = Publisher::new()
            .with_notifier(notifier.clone())
            .publish(&package, out.path().to_str().expect("utf8"), &options)
            .await?;
        assert!(published.notified);
        let sent = notifier.sent()?;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attributes["action"], "ADDED");
        assert_eq!(sent[0].attributes["maturity"], "final");
        assert!(out
            .path()
            .join(&package.names.folder)
            .join(package.stac_file())
            .exists());
        Ok(())
    }

    #[tokio::test]
    async fn topic_without_notifier_is_rejected_before_writing() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let out = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let options = PublishOptions {
            topic: Some("arn:aws:sns:ap-southeast-2:000000000000:outputs".into()),
            ..PublishOptions::default()
        };

        let err = Publisher::new()
            .publish(&package, out.path().to_str().expect("utf8"), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(!err.is_retryable());
        assert!(std::fs::read_dir(out.path())?.next().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_package_files_are_publish_errors() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        std::fs::remove_file(package.dir().join(&package.metadata_file))?;

        let out = tempfile::tempdir()?;
        let local = Publisher::new()
            .publish(&package, out.path().to_str().expect("utf8"), &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(local, Error::Publish { .. }), "{local:?}");

        let remote = Publisher::new()
            .with_storage(Arc::new(MemoryBackend::new()))
            .publish(&package, "s3://bucket/out", &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(remote, Error::Publish { .. }), "{remote:?}");
        Ok(())
    }

    #[tokio::test]
    async fn remote_destination_needs_storage() -> Result<()> {
        let scratch = tempfile::tempdir()?;
        let package = package(scratch.path())?;
        let err = Publisher::new()
            .publish(&package, "s3://bucket/out", &PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        Ok(())
    }
}

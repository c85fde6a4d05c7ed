//! Reading source bands.
//!
//! A [`RasterSource`] turns one measurement of a catalog record into pixels
//! plus the grid they sit on. [`GeoTiffSource`] reads single-band GeoTIFF
//! assets from local paths, `http(s)://` URLs or `s3://` URLs;
//! [`MemorySource`] serves preloaded bands for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use eoforge_core::{DatasetId, ObjectUrl, StorageBackend};

use crate::catalog::{Asset, DatasetRecord};
use crate::error::{Error, Result};
use crate::geotiff;
use crate::raster::{Affine, Band, GeoBox};

/// One loaded band with its grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBand {
    /// Pixels as `[y, x]`.
    pub band: Band,
    /// The band's native grid.
    pub geobox: GeoBox,
    /// The band's CRS.
    pub crs: Option<String>,
}

/// Reads source bands.
#[async_trait]
pub trait RasterSource: Send + Sync {
    /// Reads one measurement of a dataset at native resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformExecution`] if the measurement is missing or
    /// unreadable, or [`Error::AccessDenied`] if access was refused.
    async fn read_band(&self, dataset: &DatasetRecord, measurement: &str) -> Result<LoadedBand>;
}

fn asset<'a>(dataset: &'a DatasetRecord, measurement: &str) -> Result<&'a Asset> {
    dataset.measurements.get(measurement).ok_or_else(|| {
        Error::execution(format!(
            "dataset {} has no measurement '{measurement}'",
            dataset.id
        ))
    })
}

/// Bands held in memory, keyed by dataset and measurement.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    bands: Arc<RwLock<HashMap<(DatasetId, String), LoadedBand>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::execution("source lock poisoned")
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a band.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, dataset: DatasetId, measurement: &str, band: LoadedBand) -> Result<()> {
        self.bands
            .write()
            .map_err(poison_err)?
            .insert((dataset, measurement.to_string()), band);
        Ok(())
    }
}

#[async_trait]
impl RasterSource for MemorySource {
    async fn read_band(&self, dataset: &DatasetRecord, measurement: &str) -> Result<LoadedBand> {
        let bands = self.bands.read().map_err(poison_err)?;
        bands
            .get(&(dataset.id, measurement.to_string()))
            .cloned()
            .ok_or_else(|| {
                Error::execution(format!(
                    "dataset {} has no measurement '{measurement}'",
                    dataset.id
                ))
            })
    }
}

/// Reads single-band GeoTIFF assets.
///
/// `s3://` hrefs are read through the configured storage backend when there
/// is one (signed access), otherwise over public HTTPS in `region`.
#[derive(Clone)]
pub struct GeoTiffSource {
    client: reqwest::Client,
    region: String,
    storage: Option<Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for GeoTiffSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoTiffSource")
            .field("region", &self.region)
            .field("signed", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for GeoTiffSource {
    fn default() -> Self {
        Self::new()
    }
}

impl GeoTiffSource {
    /// Default region for public bucket access.
    pub const DEFAULT_REGION: &'static str = "ap-southeast-2";

    /// Creates a source that reads public objects anonymously.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            region: Self::DEFAULT_REGION.to_string(),
            storage: None,
        }
    }

    /// Sets the region used for anonymous `s3://` access.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Reads `s3://` hrefs through `storage` instead of anonymous HTTPS.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    async fn fetch(&self, href: &str) -> Result<Bytes> {
        if href.starts_with("s3://") {
            let url = ObjectUrl::parse(href)?;
            return match &self.storage {
                Some(storage) => Ok(storage.get(&url).await?),
                None => self.fetch_http(&url.https_url(&self.region)).await,
            };
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return self.fetch_http(href).await;
        }
        let path = href.strip_prefix("file://").unwrap_or(href);
        let data = tokio::fs::read(Path::new(path))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => Error::access_denied(format!("{path}: {e}")),
                _ => Error::execution(format!("reading {path}: {e}")),
            })?;
        Ok(Bytes::from(data))
    }

    async fn fetch_http(&self, url: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::execution(format!("fetching {url}: {e}")))?;
        match resp.status() {
            s if s.is_success() => resp
                .bytes()
                .await
                .map_err(|e| Error::execution(format!("fetching {url}: {e}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::access_denied(format!("{url}: HTTP {}", resp.status())))
            }
            s => Err(Error::execution(format!("fetching {url}: HTTP {s}"))),
        }
    }
}

#[async_trait]
impl RasterSource for GeoTiffSource {
    async fn read_band(&self, dataset: &DatasetRecord, measurement: &str) -> Result<LoadedBand> {
        let asset = asset(dataset, measurement)?;
        let bytes = self.fetch(&asset.href).await?;
        let decoded = tokio::task::spawn_blocking(move || geotiff::decode(&bytes)).await??;

        let geobox = decoded
            .geobox()
            .or_else(|| {
                asset
                    .transform
                    .map(|t| GeoBox::new(decoded.width, decoded.height, Affine(t)))
            })
            .ok_or_else(|| {
                Error::execution(format!("{} is not georeferenced", asset.href))
            })?;
        if let Some([h, w]) = asset.shape {
            if [h, w] != geobox.shape() {
                tracing::warn!(
                    href = %asset.href,
                    recorded = ?[h, w],
                    actual = ?geobox.shape(),
                    "band shape differs from catalog record"
                );
            }
        }

        let mut band = Band::new(decoded.data);
        band.nodata = decoded.nodata;
        Ok(LoadedBand {
            band,
            geobox,
            crs: decoded.crs.or_else(|| dataset.crs.clone()),
        })
    }
}

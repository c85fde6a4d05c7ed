//! Geospatial catalog access.
//!
//! This module provides:
//!
//! - [`DatasetRecord`]: a dataset reference as registered in the catalog
//! - [`Catalog`]: trait for looking datasets up by id and searching by product
//! - [`InMemoryCatalog`]: catalog for testing
//! - [`StacApiCatalog`]: catalog backed by a STAC API over HTTP
//!
//! ## Design Principles
//!
//! - **Read-only**: the core never mutates catalog records
//! - **Lazy search**: `search` returns a stream; pages are fetched as it is polled
//! - **Archived records stay visible to `get`** so callers can report why a
//!   dataset was rejected, but `search` never yields them

pub mod filter;
pub mod memory;
pub mod stac;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use eoforge_core::DatasetId;

use crate::error::Result;

pub use filter::{DatasetPredicate, SearchFilter};
pub use memory::InMemoryCatalog;
pub use stac::StacApiCatalog;

/// Metadata layout of a catalog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataType {
    /// Current layout, with STAC-style properties.
    #[default]
    Eo3,
    /// Legacy layout with top-level region code.
    Eo,
    /// Legacy layout with a tile id.
    EoPlus,
}

/// One band file of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Where the band lives (path, `http(s)://` or `s3://`).
    pub href: String,
    /// Pixel grid shape as `[height, width]`, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<[usize; 2]>,
    /// Affine geotransform `[a, b, c, d, e, f]`, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 6]>,
}

impl Asset {
    /// Creates an asset that points at `href`.
    #[must_use]
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            shape: None,
            transform: None,
        }
    }
}

/// A dataset reference as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    /// Catalog id.
    pub id: DatasetId,
    /// Product the dataset belongs to.
    pub product: String,
    /// Metadata layout.
    #[serde(default)]
    pub metadata_type: MetadataType,
    /// Acquisition time.
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    /// Coordinate reference system, e.g. `EPSG:32655`.
    #[serde(default)]
    pub crs: Option<String>,
    /// Footprint as GeoJSON.
    #[serde(default)]
    pub geometry: Option<Value>,
    /// Free-form properties (`eo:platform`, `odc:region_code`, ...).
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Band name to file.
    #[serde(default)]
    pub measurements: BTreeMap<String, Asset>,
    /// Whether the dataset has been archived.
    #[serde(default)]
    pub archived: bool,
    /// Lineage: ids of the datasets this one was derived from.
    #[serde(default)]
    pub sources: Vec<DatasetId>,
    /// Region code recorded outside the properties (legacy layouts).
    #[serde(default)]
    pub region_code: Option<String>,
    /// Tile or scene identifier (legacy layouts).
    #[serde(default)]
    pub tile_id: Option<String>,
}

impl DatasetRecord {
    /// Creates a record with no properties or measurements.
    #[must_use]
    pub fn new(id: DatasetId, product: impl Into<String>) -> Self {
        Self {
            id,
            product: product.into(),
            metadata_type: MetadataType::Eo3,
            datetime: None,
            crs: None,
            geometry: None,
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
            archived: false,
            sources: Vec::new(),
            region_code: None,
            tile_id: None,
        }
    }

    /// Returns a string property, if present.
    #[must_use]
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Platform name (`eo:platform`), if known.
    #[must_use]
    pub fn platform(&self) -> Option<&str> {
        self.property_str("eo:platform")
    }

    /// Instrument name (`eo:instrument`), if known.
    #[must_use]
    pub fn instrument(&self) -> Option<&str> {
        self.property_str("eo:instrument")
    }

    /// Sets a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds a measurement.
    #[must_use]
    pub fn with_measurement(mut self, name: impl Into<String>, asset: Asset) -> Self {
        self.measurements.insert(name.into(), asset);
        self
    }

    /// Sets the acquisition time.
    #[must_use]
    pub const fn with_datetime(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    /// Marks the record archived.
    #[must_use]
    pub const fn archived(mut self) -> Self {
        self.archived = true;
        self
    }
}

/// Lazily evaluated search results.
pub type DatasetStream = BoxStream<'static, Result<DatasetRecord>>;

/// Read access to a geospatial catalog.
///
/// ## Thread Safety
///
/// Implementations are shared across concurrently running tasks behind an
/// `Arc<dyn Catalog>` and must tolerate concurrent reads.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetches a dataset by id, archived or not.
    ///
    /// Returns `None` if no dataset has this id.
    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetRecord>>;

    /// Searches one product.
    ///
    /// Archived datasets are excluded. The stream is lazy: nothing is fetched
    /// until it is polled, and dropping it stops further fetches.
    fn search(&self, product: &str, filter: &SearchFilter) -> DatasetStream;

    /// Whether a dataset with this id exists.
    async fn contains(&self, id: &DatasetId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_deserializes_with_defaults() {
        let json = r#"{"id": "00000000-0000-0000-0000-000000000001", "product": "ga_ls8c_ard_3"}"#;
        let record: DatasetRecord = serde_json::from_str(json).expect("parse");
        assert_eq!(record.metadata_type, MetadataType::Eo3);
        assert!(!record.archived);
        assert!(record.measurements.is_empty());
    }

    #[test]
    fn metadata_type_names() {
        let t: MetadataType = serde_json::from_str("\"eo_plus\"").expect("parse");
        assert_eq!(t, MetadataType::EoPlus);
    }

    #[test]
    fn property_helpers() {
        let record = DatasetRecord::new(DatasetId::generate(), "p")
            .with_property("eo:platform", "landsat-8")
            .with_property("eo:instrument", "OLI_TIRS");
        assert_eq!(record.platform(), Some("landsat-8"));
        assert_eq!(record.instrument(), Some("OLI_TIRS"));
        assert_eq!(record.property_str("missing"), None);
    }
}

//! STAC items and output notifications.
//!
//! The same item model is used in two directions: [`crate::catalog::StacApiCatalog`]
//! reads items from a STAC API, and the publisher derives an item from each
//! assembled dataset document and writes it next to the package.
//!
//! ## Limitations
//!
//! Geometry is copied as-is from the dataset document. No reprojection to
//! WGS84 happens here, so items for datasets whose footprint is in a
//! projected CRS carry projected coordinates.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use eoforge_core::Location;

use crate::assembler::DatasetDocument;
use crate::catalog::filter::geometry_bounds;
use crate::error::{Error, Result};

/// STAC version written into generated items.
pub const STAC_VERSION: &str = "1.0.0";

/// Projection extension schema.
pub const PROJECTION_EXTENSION: &str =
    "https://stac-extensions.github.io/projection/v1.0.0/schema.json";

/// Media type used for band assets.
pub const GEOTIFF_MEDIA_TYPE: &str = "image/tiff; application=geotiff; profile=cloud-optimized";

fn feature() -> String {
    "Feature".to_string()
}

/// A STAC item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacItem {
    /// Always `Feature`.
    #[serde(rename = "type", default = "feature")]
    pub kind: String,
    /// STAC version.
    #[serde(default)]
    pub stac_version: String,
    /// Extension schema URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stac_extensions: Vec<String>,
    /// Item id.
    pub id: String,
    /// Collection (product) name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Footprint.
    #[serde(default)]
    pub geometry: Option<Value>,
    /// Bounds of the footprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Item properties, including `datetime`.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Assets by key.
    #[serde(default)]
    pub assets: BTreeMap<String, StacAsset>,
    /// Links.
    #[serde(default)]
    pub links: Vec<StacLink>,
}

/// A STAC asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacAsset {
    /// Location of the file.
    pub href: String,
    /// Media type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Roles such as `data` or `thumbnail`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Extension fields (`proj:shape`, `proj:transform`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StacAsset {
    fn new(href: String, media_type: &str, role: &str) -> Self {
        Self {
            href,
            media_type: Some(media_type.to_string()),
            title: None,
            roles: vec![role.to_string()],
            extra: BTreeMap::new(),
        }
    }

    /// Whether the asset holds pixel data.
    #[must_use]
    pub fn is_data(&self) -> bool {
        if self.roles.is_empty() {
            return self
                .media_type
                .as_deref()
                .is_some_and(|t| t.starts_with("image/tiff"));
        }
        self.roles.iter().any(|r| r == "data")
    }
}

/// A STAC link.
///
/// Search responses use `method`, `body` and `merge` on `next` links to
/// describe how to fetch the following page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StacLink {
    /// Relation type.
    pub rel: String,
    /// Target.
    pub href: String,
    /// Media type of the target.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// HTTP method for the target (search pagination).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request body for the target (search pagination).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Whether `body` is merged into the previous request body.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merge: bool,
}

impl StacLink {
    fn new(rel: &str, href: String, media_type: Option<&str>) -> Self {
        Self {
            rel: rel.to_string(),
            href,
            media_type: media_type.map(str::to_string),
            method: None,
            body: None,
            merge: false,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemCollection {
    /// Items on this page.
    #[serde(default)]
    pub features: Vec<StacItem>,
    /// Pagination links.
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl ItemCollection {
    /// The `next` link, if there are more pages.
    #[must_use]
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

fn epsg_code(crs: &str) -> Option<u32> {
    crs.strip_prefix("EPSG:")
        .or_else(|| crs.strip_prefix("epsg:"))
        .and_then(|code| code.parse().ok())
}

/// Builds the STAC item for a published dataset.
///
/// `dataset_location` is the final directory of the package; asset hrefs are
/// resolved against it. `metadata_path` is the dataset document's file name
/// inside the package and `stac_path` the item's own.
#[must_use]
pub fn item_from_document(
    doc: &DatasetDocument,
    dataset_location: &str,
    metadata_path: &str,
    stac_path: &str,
    explorer_url: Option<&str>,
) -> StacItem {
    let base = Location::classify(dataset_location);
    let href = |relative: &str| base.join(relative).to_string();

    let mut properties = doc.properties.clone();
    properties.insert("odc:product".into(), Value::from(doc.product.name.clone()));
    if let Some(code) = doc.crs.as_deref().and_then(epsg_code) {
        properties.insert("proj:epsg".into(), Value::from(code));
    }
    if let Some(grid) = doc.grids.get("default") {
        properties.insert("proj:shape".into(), serde_json::json!(grid.shape));
        properties.insert("proj:transform".into(), serde_json::json!(grid.transform));
    }

    let mut assets = BTreeMap::new();
    for (name, measurement) in &doc.measurements {
        let mut asset = StacAsset::new(href(&measurement.path), GEOTIFF_MEDIA_TYPE, "data");
        asset.title = Some(name.clone());
        if let Some(grid) = measurement.grid.as_deref().and_then(|g| doc.grids.get(g)) {
            asset.extra.insert("proj:shape".into(), serde_json::json!(grid.shape));
            asset.extra.insert("proj:transform".into(), serde_json::json!(grid.transform));
        }
        assets.insert(name.clone(), asset);
    }
    for (name, accessory) in &doc.accessories {
        let (media_type, role) = match accessory.kind.as_deref() {
            Some("thumbnail") => ("image/tiff", "thumbnail"),
            _ => ("text/plain", "metadata"),
        };
        assets.insert(name.clone(), StacAsset::new(href(&accessory.path), media_type, role));
    }

    let mut links = vec![
        StacLink::new("self", href(stac_path), Some("application/json")),
        StacLink::new("odc_yaml", href(metadata_path), Some("text/yaml")),
    ];
    if let Some(explorer) = explorer_url.map(|u| u.trim_end_matches('/')) {
        let product = &doc.product.name;
        links.push(StacLink::new(
            "collection",
            format!("{explorer}/stac/collections/{product}"),
            None,
        ));
        links.push(StacLink::new(
            "product_overview",
            format!("{explorer}/product/{product}"),
            Some("text/html"),
        ));
        links.push(StacLink::new(
            "alternative",
            format!("{explorer}/dataset/{}", doc.id),
            Some("text/html"),
        ));
    }

    StacItem {
        kind: feature(),
        stac_version: STAC_VERSION.to_string(),
        stac_extensions: vec![PROJECTION_EXTENSION.to_string()],
        id: doc.id.to_string(),
        collection: Some(doc.product.name.clone()),
        bbox: doc.geometry.as_ref().and_then(geometry_bounds),
        geometry: doc.geometry.clone(),
        properties,
        assets,
        links,
    }
}

/// Message attributes that accompany a published item.
#[must_use]
pub fn notification_attributes(item: &StacItem) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::from([("action".to_string(), "ADDED".to_string())]);
    if let Some(collection) = &item.collection {
        attributes.insert("product".into(), collection.clone());
    }
    for (key, attr) in [
        ("datetime", "datetime"),
        ("dea:dataset_maturity", "maturity"),
        ("odc:region_code", "region_code"),
    ] {
        if let Some(value) = item.properties.get(key).and_then(Value::as_str) {
            attributes.insert(attr.into(), value.to_string());
        }
    }
    attributes
}

/// Publishes messages about new outputs to a topic.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends one message.
    async fn notify(
        &self,
        topic: &str,
        message: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// A notification recorded by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Topic it was sent to.
    pub topic: String,
    /// Message body.
    pub message: String,
    /// Message attributes.
    pub attributes: BTreeMap<String, String>,
}

/// Notifier that records messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    sent: Arc<RwLock<Vec<Notification>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::publish("notifier lock poisoned")
}

impl MemoryNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message sent so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn sent(&self) -> Result<Vec<Notification>> {
        Ok(self.sent.read().map_err(poison_err)?.clone())
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(
        &self,
        topic: &str,
        message: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.sent.write().map_err(poison_err)?.push(Notification {
            topic: topic.to_string(),
            message: message.to_string(),
            attributes: attributes.clone(),
        });
        Ok(())
    }
}

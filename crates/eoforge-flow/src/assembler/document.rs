//! The eo3 dataset document written next to every package.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::raster::GeoBox;

/// Schema URL of eo3 dataset documents.
pub const DATASET_SCHEMA: &str = "https://schemas.opendatacube.org/dataset";

/// Reference to the product a dataset belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    /// Product name.
    pub name: String,
    /// Where the product definition lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl ProductRef {
    /// A product reference with no href.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            href: None,
        }
    }
}

/// A pixel grid in the document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridDoc {
    /// `[height, width]`.
    pub shape: [usize; 2],
    /// Row-major 3x3 affine matrix.
    pub transform: [f64; 9],
}

impl From<&GeoBox> for GridDoc {
    fn from(geobox: &GeoBox) -> Self {
        let [a, b, c, d, e, f] = geobox.affine.0;
        Self {
            shape: geobox.shape(),
            transform: [a, b, c, d, e, f, 0.0, 0.0, 1.0],
        }
    }
}

/// One band file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementDoc {
    /// File path relative to the document.
    pub path: String,
    /// Grid name when not `default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
}

/// A non-band file (thumbnail, checksums, processing info).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryDoc {
    /// File path relative to the document.
    pub path: String,
    /// Kind of accessory.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// An eo3 dataset document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDocument {
    /// Schema URL.
    #[serde(rename = "$schema")]
    pub schema: String,
    /// Dataset id.
    pub id: Uuid,
    /// Human-readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Product.
    pub product: ProductRef,
    /// Coordinate reference system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
    /// Footprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    /// Named pixel grids.
    #[serde(default)]
    pub grids: BTreeMap<String, GridDoc>,
    /// Properties.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Band files.
    #[serde(default)]
    pub measurements: BTreeMap<String, MeasurementDoc>,
    /// Other files.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub accessories: BTreeMap<String, AccessoryDoc>,
    /// Source datasets by classifier.
    #[serde(default)]
    pub lineage: BTreeMap<String, Vec<Uuid>>,
}

impl DatasetDocument {
    /// An empty document.
    #[must_use]
    pub fn new(id: Uuid, product: ProductRef) -> Self {
        Self {
            schema: DATASET_SCHEMA.to_string(),
            id,
            label: None,
            product,
            crs: None,
            geometry: None,
            grids: BTreeMap::new(),
            properties: BTreeMap::new(),
            measurements: BTreeMap::new(),
            accessories: BTreeMap::new(),
            lineage: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Affine;

    #[test]
    fn grid_from_geobox() {
        let geobox = GeoBox::new(3, 2, Affine::north_up(10.0, 20.0, 30.0, 30.0));
        let grid = GridDoc::from(&geobox);
        assert_eq!(grid.shape, [2, 3]);
        assert_eq!(grid.transform, [30.0, 0.0, 10.0, 0.0, -30.0, 20.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn document_yaml_uses_schema_key() {
        let doc = DatasetDocument::new(Uuid::nil(), ProductRef::named("p"));
        let yaml = serde_yaml::to_string(&doc).expect("yaml");
        assert!(yaml.contains("$schema: https://schemas.opendatacube.org/dataset"));
        assert!(!yaml.contains("accessories"));
        let back: DatasetDocument = serde_yaml::from_str(&yaml).expect("parse");
        assert_eq!(back, doc);
    }
}

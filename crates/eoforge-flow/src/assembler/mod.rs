//! Output package assembly.
//!
//! A package is one folder holding the output bands as GeoTIFFs, an eo3
//! dataset document, a processing-info document, an optional preview and a
//! checksum file covering everything else.
//!
//! ## Sessions
//!
//! [`AssemblerFactory::begin`] opens a [`MetadataAssembler`] session rooted
//! at a scratch directory. Sources and properties go in first, because the
//! package folder and file names are derived from them when the first file
//! is written. [`MetadataAssembler::done`] writes the documents and hands
//! back an [`AssembledPackage`].
//!
//! [`assemble`] drives a session for one task in the order the job
//! configuration expects.

pub mod document;
pub mod eo3;
pub mod naming;
pub mod preview;
pub mod provenance;

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use eoforge_core::config::{SinglebandPreview, WriteOptions};
use eoforge_core::DatasetId;

use crate::catalog::DatasetRecord;
use crate::error::Result;
use crate::invoker::Invocation;
use crate::raster::RasterDataset;
use crate::task::{Task, TaskIdentity};
use crate::transform::TransformInfo;

pub use document::{AccessoryDoc, DatasetDocument, GridDoc, MeasurementDoc, ProductRef};
pub use eo3::Eo3Assembler;
pub use naming::{Names, NamingConventions};

/// Name under which this tool records itself in software versions.
pub const SOFTWARE_NAME: &str = "eoforge";
/// Where this tool's source lives.
pub const SOFTWARE_URL: &str = "https://github.com/eoforge/eoforge";
/// This tool's version.
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One metadata assembly session.
pub trait MetadataAssembler: Send {
    /// Records a source dataset, inheriting its acquisition properties.
    ///
    /// With `lineage` the source id is listed in the document's lineage.
    fn add_source(&mut self, source: &DatasetRecord, lineage: bool);

    /// Sets the output footprint.
    fn set_geometry(&mut self, geometry: Value);

    /// Sets a property, replacing any inherited value.
    fn set_property(&mut self, key: &str, value: Value);

    /// Records a piece of software that produced the output.
    fn note_software(&mut self, name: &str, url: &str, version: &str);

    /// Writes every band of `data`.
    ///
    /// `nodata`, when given, is stamped on every band.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Publish`] if a band cannot be encoded or
    /// written.
    fn write_measurements(
        &mut self,
        data: &RasterDataset,
        nodata: Option<f64>,
        options: &WriteOptions,
    ) -> Result<()>;

    /// Writes a preview from three written bands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Publish`] if a band was not written.
    fn write_rgb_preview(&mut self, bands: &[String; 3]) -> Result<()>;

    /// Writes a preview of one written band.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Publish`] if the band was not written.
    fn write_singleband_preview(&mut self, preview: &SinglebandPreview) -> Result<()>;

    /// Writes the documents and closes the session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Publish`] if nothing was written or a
    /// document cannot be written.
    fn done(self: Box<Self>) -> Result<AssembledPackage>;
}

/// Opens assembly sessions.
pub trait AssemblerFactory: Send + Sync {
    /// Starts a session writing under `dir`.
    fn begin(&self, dir: &Path, id: DatasetId, naming: NamingConventions)
        -> Box<dyn MetadataAssembler>;
}

/// A finished package in the scratch directory.
#[derive(Debug, Clone)]
pub struct AssembledPackage {
    /// Output dataset id.
    pub id: DatasetId,
    /// Scratch directory the session was rooted at.
    pub root: PathBuf,
    /// Names the package was written under.
    pub names: Names,
    /// File name of the dataset document.
    pub metadata_file: String,
    /// The dataset document as written.
    pub document: DatasetDocument,
    /// Every file in the package folder.
    pub files: Vec<String>,
}

impl AssembledPackage {
    /// The package folder in the scratch directory.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.names.folder)
    }

    /// Path of the dataset document.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.dir().join(&self.metadata_file)
    }

    /// File name for a STAC item next to the document.
    #[must_use]
    pub fn stac_file(&self) -> String {
        format!("{}.stac-item.json", self.names.prefix)
    }
}

/// Property key for a naming metadata entry of the job configuration.
///
/// `naming_conventions` selects the convention and is not a property.
#[must_use]
pub fn metadata_property(key: &str) -> Option<String> {
    match key {
        "naming_conventions" => None,
        "product_family" => Some("odc:product_family".into()),
        "dataset_version" => Some("odc:dataset_version".into()),
        "producer" => Some("odc:producer".into()),
        "collection_number" => Some("odc:collection_number".into()),
        "product_name" => Some("odc:product".into()),
        "maturity" | "dataset_maturity" => Some("dea:dataset_maturity".into()),
        other => Some(other.to_string()),
    }
}

/// Assembles the package for one executed task under `dir`.
///
/// # Errors
///
/// Returns [`crate::Error::Publish`] if any part of the package cannot be
/// written.
pub fn assemble(
    factory: &dyn AssemblerFactory,
    dir: &Path,
    task: &Task,
    identity: &TaskIdentity,
    invocation: &Invocation,
    transform: &TransformInfo,
) -> Result<AssembledPackage> {
    let config = task.config();
    let output = &config.output;
    let source = task.dataset();

    let naming = NamingConventions::select(
        output.metadata.get("naming_conventions").map(String::as_str),
        source.platform(),
    );
    let mut session = factory.begin(dir, identity.id, naming);

    session.add_source(source, output.reference_source_dataset);
    if output.inherit_geometry {
        if let Some(geometry) = &source.geometry {
            session.set_geometry(geometry.clone());
        }
    }
    for (key, value) in &output.metadata {
        if let Some(property) = metadata_property(key) {
            session.set_property(&property, Value::from(value.clone()));
        }
    }
    if let Some(family) = &config.specification.override_product_family {
        session.set_property("odc:product_family", Value::from(family.clone()));
    }
    for (key, value) in &output.properties {
        session.set_property(key, value.clone());
    }
    session.set_property(
        "odc:processing_datetime",
        Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    );

    session.note_software(SOFTWARE_NAME, SOFTWARE_URL, SOFTWARE_VERSION);
    let transform_url = config
        .specification
        .transform_url
        .as_deref()
        .unwrap_or(&transform.url);
    session.note_software(&transform.name, transform_url, &transform.version);

    session.write_measurements(&invocation.data, output.nodata, &output.write_data_settings)?;
    if let Some(bands) = &output.preview_image {
        session.write_rgb_preview(bands)?;
    }
    if let Some(preview) = &output.preview_image_singleband {
        session.write_singleband_preview(preview)?;
    }
    session.done()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_metadata_maps_to_properties() {
        assert_eq!(metadata_property("product_family").as_deref(), Some("odc:product_family"));
        assert_eq!(metadata_property("maturity").as_deref(), Some("dea:dataset_maturity"));
        assert_eq!(metadata_property("naming_conventions"), None);
        assert_eq!(metadata_property("custom:key").as_deref(), Some("custom:key"));
    }
}

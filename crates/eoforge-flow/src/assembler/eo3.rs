//! eo3 package writer.
//!
//! File layout inside the package folder, for prefix `P`:
//!
//! - `P_{band}.tif` per band
//! - `P_thumbnail.tif` when a preview is requested
//! - `P.proc-info.yaml` with the software versions
//! - `P.odc-metadata.yaml`, the dataset document
//! - `P.sha256`, `{hex}\t{file}` per other file

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use eoforge_core::config::{SinglebandPreview, WriteOptions};
use eoforge_core::storage::sha256_hex;
use eoforge_core::DatasetId;

use super::document::{AccessoryDoc, DatasetDocument, GridDoc, MeasurementDoc, ProductRef};
use super::naming::{Names, NamingConventions};
use super::preview::{self, Rgb8};
use super::provenance;
use super::{AssembledPackage, AssemblerFactory, MetadataAssembler};
use crate::catalog::DatasetRecord;
use crate::error::{Error, Result};
use crate::geotiff;
use crate::raster::{Affine, Band, GeoBox, RasterDataset};

/// Opens [`Eo3Session`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Eo3Assembler;

impl AssemblerFactory for Eo3Assembler {
    fn begin(
        &self,
        dir: &Path,
        id: DatasetId,
        naming: NamingConventions,
    ) -> Box<dyn MetadataAssembler> {
        Box::new(Eo3Session::new(dir, id, naming))
    }
}

#[derive(Debug, Clone, Serialize)]
struct Software {
    name: String,
    url: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ProcInfo<'a> {
    software_versions: &'a [Software],
}

/// An eo3 assembly session.
#[derive(Debug)]
pub struct Eo3Session {
    root: PathBuf,
    id: DatasetId,
    naming: NamingConventions,
    names: Option<Names>,
    properties: BTreeMap<String, Value>,
    lineage: BTreeMap<String, Vec<uuid::Uuid>>,
    geometry: Option<Value>,
    software: Vec<Software>,
    crs: Option<String>,
    grid: Option<GridDoc>,
    measurements: BTreeMap<String, MeasurementDoc>,
    accessories: BTreeMap<String, AccessoryDoc>,
    bands: BTreeMap<String, Band>,
    files: Vec<String>,
}

impl Eo3Session {
    /// Starts a session writing under `root`.
    #[must_use]
    pub fn new(root: &Path, id: DatasetId, naming: NamingConventions) -> Self {
        Self {
            root: root.to_path_buf(),
            id,
            naming,
            names: None,
            properties: BTreeMap::new(),
            lineage: BTreeMap::new(),
            geometry: None,
            software: Vec::new(),
            crs: None,
            grid: None,
            measurements: BTreeMap::new(),
            accessories: BTreeMap::new(),
            bands: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    /// Names are fixed by the first file written.
    fn names(&mut self) -> Result<Names> {
        if let Some(names) = &self.names {
            return Ok(names.clone());
        }
        let names = self.naming.names(&self.properties)?;
        tracing::debug!(
            dataset_id = %self.id,
            naming = %self.naming,
            folder = %names.folder,
            "package names fixed"
        );
        self.names = Some(names.clone());
        Ok(names)
    }

    fn write_file(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let folder = self.names()?.folder;
        let dir = self.root.join(folder);
        fs::create_dir_all(&dir)
            .map_err(|e| Error::publish_with_source(format!("creating {}", dir.display()), e))?;
        let path = dir.join(name);
        fs::write(&path, bytes)
            .map_err(|e| Error::publish_with_source(format!("writing {}", path.display()), e))?;
        self.files.push(name.to_string());
        Ok(())
    }

    fn written_band(&self, name: &str) -> Result<&Band> {
        self.bands
            .get(name)
            .ok_or_else(|| Error::publish(format!("preview band '{name}' was not written")))
    }

    fn write_preview(&mut self, image: &Rgb8) -> Result<()> {
        let prefix = self.names()?.prefix;
        let file = format!("{prefix}_thumbnail.tif");
        let bytes = geotiff::encode_rgb8(image.width, image.height, &image.pixels)?;
        self.write_file(&file, &bytes)?;
        self.accessories.insert(
            "thumbnail".into(),
            AccessoryDoc {
                path: file,
                kind: Some("thumbnail".into()),
            },
        );
        Ok(())
    }

    fn footprint(&self) -> Option<Value> {
        let grid = self.grid?;
        let [a, b, c, d, e, f, ..] = grid.transform;
        let geobox = GeoBox::new(grid.shape[1], grid.shape[0], Affine([a, b, c, d, e, f]));
        let [x0, y0, x1, y1] = geobox.bounds();
        Some(serde_json::json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]],
        }))
    }
}

impl MetadataAssembler for Eo3Session {
    fn add_source(&mut self, source: &DatasetRecord, lineage: bool) {
        for (key, value) in provenance::source_properties(source) {
            if provenance::is_inherited(&key) {
                self.properties.entry(key).or_insert(value);
            }
        }
        if lineage {
            let classifier = provenance::product_family(&source.product).unwrap_or("source");
            self.lineage
                .entry(classifier.to_string())
                .or_default()
                .push(source.id.as_uuid());
        }
    }

    fn set_geometry(&mut self, geometry: Value) {
        self.geometry = Some(geometry);
    }

    fn set_property(&mut self, key: &str, value: Value) {
        if self.names.is_some() {
            tracing::warn!(key, "property set after files were written; names are unchanged");
        }
        self.properties.insert(key.to_string(), value);
    }

    fn note_software(&mut self, name: &str, url: &str, version: &str) {
        self.software.push(Software {
            name: name.to_string(),
            url: url.to_string(),
            version: version.to_string(),
        });
    }

    fn write_measurements(
        &mut self,
        data: &RasterDataset,
        nodata: Option<f64>,
        options: &WriteOptions,
    ) -> Result<()> {
        if data.bands.is_empty() {
            return Err(Error::publish("output has no bands"));
        }
        if let Some(method) = options.overview_resampling {
            tracing::debug!(%method, "overviews are not written; resampling ignored");
        }
        let prefix = self.names()?.prefix;
        for (name, band) in &data.bands {
            let mut band = band.clone();
            if nodata.is_some() {
                band.nodata = nodata;
            }
            let bytes = geotiff::encode(&band, &data.geobox, data.crs.as_deref())?;
            let file = format!("{prefix}_{name}.tif");
            self.write_file(&file, &bytes)?;
            self.measurements.insert(
                name.clone(),
                MeasurementDoc {
                    path: file,
                    grid: None,
                },
            );
            self.bands.insert(name.clone(), band);
        }
        self.grid = Some(GridDoc::from(&data.geobox));
        self.crs.clone_from(&data.crs);
        Ok(())
    }

    fn write_rgb_preview(&mut self, bands: &[String; 3]) -> Result<()> {
        let image = preview::rgb(
            self.written_band(&bands[0])?,
            self.written_band(&bands[1])?,
            self.written_band(&bands[2])?,
        )?;
        self.write_preview(&image)
    }

    fn write_singleband_preview(&mut self, settings: &SinglebandPreview) -> Result<()> {
        let image = preview::singleband(
            self.written_band(&settings.measurement)?,
            &settings.lookup_table,
        )?;
        self.write_preview(&image)
    }

    fn done(mut self: Box<Self>) -> Result<AssembledPackage> {
        if self.measurements.is_empty() {
            return Err(Error::publish("no measurements were written"));
        }
        let names = self.names()?;
        let prefix = &names.prefix;

        let proc_info = format!("{prefix}.proc-info.yaml");
        let yaml = serde_yaml::to_string(&ProcInfo {
            software_versions: &self.software,
        })
        .map_err(|e| Error::publish_with_source("encoding processing info", e))?;
        self.write_file(&proc_info, yaml.as_bytes())?;
        self.accessories.insert(
            "metadata:processor".into(),
            AccessoryDoc {
                path: proc_info,
                kind: None,
            },
        );
        let checksum = format!("{prefix}.sha256");
        self.accessories.insert(
            "checksum:sha256".into(),
            AccessoryDoc {
                path: checksum.clone(),
                kind: None,
            },
        );

        let mut doc = DatasetDocument::new(self.id.as_uuid(), ProductRef::named(&names.product));
        doc.label = Some(prefix.clone());
        doc.crs.clone_from(&self.crs);
        doc.geometry = self.geometry.clone().or_else(|| self.footprint());
        if let Some(grid) = self.grid {
            doc.grids.insert("default".into(), grid);
        }
        doc.properties.clone_from(&self.properties);
        doc.properties
            .insert("odc:file_format".into(), Value::from("GeoTIFF"));
        doc.measurements.clone_from(&self.measurements);
        doc.accessories.clone_from(&self.accessories);
        doc.lineage.clone_from(&self.lineage);

        let metadata_file = format!("{prefix}.odc-metadata.yaml");
        let yaml = serde_yaml::to_string(&doc)
            .map_err(|e| Error::publish_with_source("encoding dataset document", e))?;
        self.write_file(&metadata_file, yaml.as_bytes())?;

        let dir = self.root.join(&names.folder);
        let mut listed = self.files.clone();
        listed.sort();
        let lines = listed
            .iter()
            .map(|file| -> Result<String> {
                let bytes = fs::read(dir.join(file))?;
                Ok(format!("{}\t{file}\n", sha256_hex(&bytes)))
            })
            .collect::<Result<String>>()?;
        self.write_file(&checksum, lines.as_bytes())?;

        tracing::info!(
            dataset_id = %self.id,
            product = %names.product,
            files = self.files.len(),
            "package assembled"
        );
        Ok(AssembledPackage {
            id: self.id,
            root: self.root.clone(),
            names,
            metadata_file,
            document: doc,
            files: self.files.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::BandData;
    use ndarray::arr2;

    fn source() -> DatasetRecord {
        DatasetRecord::new(DatasetId::generate(), "ga_ls8c_ard_3")
            .with_property("datetime", "2020-05-17T00:00:00Z")
            .with_property("eo:platform", "landsat-8")
            .with_property("eo:instrument", "OLI_TIRS")
            .with_property("odc:region_code", "090084")
            .with_property("odc:product", "ga_ls8c_ard_3")
    }

    fn data() -> RasterDataset {
        RasterDataset::new(GeoBox::new(2, 2, Affine::north_up(0.0, 20.0, 10.0, 10.0)))
            .with_crs("EPSG:3577")
            .with_band(
                "ndvi",
                Band::new(BandData::Float32(arr2(&[[0.1_f32, 0.2], [0.3, f32::NAN]]).into_dyn())),
            )
    }

    fn session(dir: &Path) -> Box<dyn MetadataAssembler> {
        let mut s = Eo3Assembler.begin(dir, DatasetId::generate(), NamingConventions::Dea);
        s.add_source(&source(), true);
        s.set_property("odc:product_family", Value::from("ndvi"));
        s.set_property("odc:producer", Value::from("ga.gov.au"));
        s.note_software("eoforge", "https://example.com", "0.1.0");
        s
    }

    #[test]
    fn writes_a_complete_package() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut s = session(dir.path());
        s.write_measurements(&data(), Some(-1.0), &WriteOptions::default())?;
        s.write_singleband_preview(&SinglebandPreview {
            measurement: "ndvi".into(),
            lookup_table: BTreeMap::new(),
        })?;
        let package = s.done()?;

        assert_eq!(package.names.folder, "ga_ls8c_ndvi/0-0-0/090084/2020/05/17");
        assert_eq!(package.document.product.name, "ga_ls8c_ndvi");
        assert!(package.metadata_path().exists());
        assert_eq!(package.document.lineage["ard"].len(), 1);
        assert_eq!(package.document.properties["odc:region_code"], "090084");
        assert!(!package.document.properties.contains_key("odc:product"));
        assert_eq!(package.document.grids["default"].shape, [2, 2]);
        assert!(package.document.accessories.contains_key("thumbnail"));

        let checksums = fs::read_to_string(package.dir().join("ga_ls8c_ndvi_090084_2020-05-17.sha256"))?;
        assert_eq!(checksums.lines().count(), package.files.len() - 1);
        assert!(checksums.contains(".odc-metadata.yaml"));

        let written = fs::read(package.dir().join(&package.document.measurements["ndvi"].path))?;
        assert_eq!(geotiff::decode(&written)?.nodata, Some(-1.0));
        Ok(())
    }

    #[test]
    fn geometry_defaults_to_grid_footprint() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut s = session(dir.path());
        s.write_measurements(&data(), None, &WriteOptions::default())?;
        let package = s.done()?;
        let geometry = package.document.geometry.expect("geometry");
        assert_eq!(geometry["coordinates"][0][0], serde_json::json!([0.0, 0.0]));
        assert_eq!(geometry["coordinates"][0][2], serde_json::json!([20.0, 20.0]));
        Ok(())
    }

    #[test]
    fn done_without_measurements_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let s = session(dir.path());
        assert!(matches!(s.done(), Err(Error::Publish { .. })));
        Ok(())
    }

    #[test]
    fn preview_needs_written_bands() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut s = session(dir.path());
        s.write_measurements(&data(), None, &WriteOptions::default())?;
        let err = s
            .write_rgb_preview(&["red".into(), "green".into(), "blue".into()])
            .unwrap_err();
        assert!(matches!(err, Error::Publish { .. }));
        Ok(())
    }
}

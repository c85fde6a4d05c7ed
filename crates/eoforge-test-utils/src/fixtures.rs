//! Pre-built test fixtures for common test scenarios.
//!
//! [`JobFixture`] wires a job to in-memory collaborators: a catalog, a raster
//! source, queues, a notifier and traced object storage. Outputs go to a
//! scratch directory unless an `s3://` location is configured.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use ndarray::ArrayD;
use tempfile::TempDir;

use eoforge_core::{Configuration, DatasetId};
use eoforge_flow::catalog::{DatasetRecord, InMemoryCatalog};
use eoforge_flow::dispatch::{InMemoryQueues, QueueProvider};
use eoforge_flow::publish::Publisher;
use eoforge_flow::raster::{Affine, Band, BandData, GeoBox};
use eoforge_flow::source::{LoadedBand, MemorySource};
use eoforge_flow::stac::MemoryNotifier;
use eoforge_flow::transform::TransformRegistry;
use eoforge_flow::{JobContext, Runner};

use crate::storage::TracingMemoryBackend;

/// Side length of fixture bands, in pixels.
pub const BAND_SIZE: usize = 20;

/// A square `uint16` band filled with `value`, on a 10 m grid.
pub fn uint16_band(value: u16, size: usize) -> LoadedBand {
    LoadedBand {
        band: Band::new(BandData::Uint16(ArrayD::from_elem(vec![size, size], value)))
            .with_nodata(0.0),
        geobox: GeoBox::new(size, size, Affine::north_up(500_000.0, 6_000_000.0, 10.0, 10.0)),
        crs: Some("EPSG:32655".into()),
    }
}

/// A configuration document for `products` run through `transform`.
pub fn config_yaml(products: &[&str], transform: &str, location: &str, output_extra: &str) -> String {
    let selection = match products {
        [single] => format!("  product: {single}\n"),
        many => format!("  products: [{}]\n", many.join(", ")),
    };
    format!(
        "specification:\n{selection}  measurements: [red, nir]\n  transform: {transform}\noutput:\n  location: {location}\n{output_extra}"
    )
}

/// A job wired to in-memory collaborators.
pub struct JobFixture {
    /// Scratch output directory.
    pub out: TempDir,
    /// Catalog holding every added dataset.
    pub catalog: Arc<InMemoryCatalog>,
    /// Source serving `red` and `nir` for every added dataset.
    pub source: Arc<MemorySource>,
    /// Work queues.
    pub queues: Arc<InMemoryQueues>,
    /// Records notifications.
    pub notifier: Arc<MemoryNotifier>,
    /// Object storage for `s3://` locations.
    pub storage: Arc<TracingMemoryBackend>,
    /// Transforms available to the job.
    pub registry: Arc<TransformRegistry>,
    products: Vec<String>,
    transform: String,
    location: Option<String>,
    output_extra: String,
    processing: String,
    topic: Option<String>,
    next_region: AtomicU32,
}

impl JobFixture {
    /// A `passthrough` job over `products`, writing to a scratch directory.
    pub fn new(products: &[&str]) -> Self {
        Self {
            out: tempfile::tempdir().expect("tempdir"),
            catalog: Arc::new(InMemoryCatalog::new()),
            source: Arc::new(MemorySource::new()),
            queues: Arc::new(InMemoryQueues::new()),
            notifier: Arc::new(MemoryNotifier::new()),
            storage: Arc::new(TracingMemoryBackend::new()),
            registry: Arc::new(TransformRegistry::with_builtins()),
            products: products.iter().map(ToString::to_string).collect(),
            transform: "passthrough".into(),
            location: None,
            output_extra: String::new(),
            processing: String::new(),
            topic: None,
            next_region: AtomicU32::new(90_084),
        }
    }

    /// Uses another registered transform.
    #[must_use]
    pub fn with_transform(mut self, name: &str) -> Self {
        self.transform = name.to_string();
        self
    }

    /// Replaces the transform registry.
    #[must_use]
    pub fn with_registry(mut self, registry: TransformRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Writes to `location` (e.g. `s3://bucket/prefix`) instead of the
    /// scratch directory.
    #[must_use]
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    /// Adds indented lines under `output:`.
    #[must_use]
    pub fn with_output_yaml(mut self, lines: &str) -> Self {
        self.output_extra.push_str(lines);
        self
    }

    /// Runs up to `n` tasks at once.
    #[must_use]
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.processing = format!("processing:\n  concurrency: {n}\n");
        self
    }

    /// Notifies `topic` about every output.
    #[must_use]
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    /// The output location.
    pub fn location(&self) -> String {
        self.location
            .clone()
            .unwrap_or_else(|| self.out.path().display().to_string())
    }

    /// The parsed configuration.
    pub fn config(&self) -> Arc<Configuration> {
        let products: Vec<&str> = self.products.iter().map(String::as_str).collect();
        let doc = config_yaml(&products, &self.transform, &self.location(), &self.output_extra)
            + &self.processing;
        Arc::new(Configuration::from_yaml_str(&doc).expect("fixture configuration"))
    }

    /// Adds a Landsat-like dataset acquired on 2020-01-`day` with `red` and
    /// `nir` bands.
    pub fn add_dataset(&self, product: &str, day: u32) -> DatasetRecord {
        let region = self.next_region.fetch_add(1, Ordering::SeqCst);
        let record = DatasetRecord::new(DatasetId::generate(), product)
            .with_datetime(Utc.with_ymd_and_hms(2020, 1, day, 0, 0, 0).unwrap())
            .with_property("eo:platform", "landsat-8")
            .with_property("eo:instrument", "OLI_TIRS")
            .with_property("odc:region_code", format!("{region:06}"));
        self.insert_bands(&record, 100, 300);
        self.catalog.insert(record.clone()).expect("insert");
        record
    }

    /// Adds `count` datasets to `product`, one per day.
    pub fn add_datasets(&self, product: &str, count: u32) -> Vec<DatasetRecord> {
        (1..=count).map(|day| self.add_dataset(product, day)).collect()
    }

    /// Serves `red` and `nir` bands for `record`.
    pub fn insert_bands(&self, record: &DatasetRecord, red: u16, nir: u16) {
        self.source
            .insert(record.id, "red", uint16_band(red, BAND_SIZE))
            .expect("insert");
        self.source
            .insert(record.id, "nir", uint16_band(nir, BAND_SIZE))
            .expect("insert");
    }

    /// A job context over the fixture's collaborators.
    pub fn context(&self) -> JobContext {
        let publisher = Publisher::new()
            .with_storage(Arc::clone(&self.storage) as _)
            .with_notifier(Arc::clone(&self.notifier) as _);
        let ctx = JobContext::new(self.config(), Arc::clone(&self.catalog) as _)
            .with_registry(Arc::clone(&self.registry))
            .with_source(Arc::clone(&self.source) as _)
            .with_publisher(publisher)
            .with_queues(Arc::clone(&self.queues) as Arc<dyn QueueProvider>);
        match &self.topic {
            Some(topic) => ctx.with_topic(topic.clone()),
            None => ctx,
        }
    }

    /// A runner over [`Self::context`].
    pub fn runner(&self) -> Runner {
        Runner::new(self.context())
    }

    /// Every file under the scratch output directory, sorted.
    pub fn output_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &std::path::Path, out: &mut Vec<PathBuf>) {
            for entry in std::fs::read_dir(dir).expect("read_dir").flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push(path);
                }
            }
        }
        let mut files = Vec::new();
        walk(self.out.path(), &mut files);
        files.sort();
        files
    }
}

//! Transform execution.
//!
//! [`TransformInvoker::execute`] runs one task through a fixed sequence of
//! stages:
//!
//! ```text
//! Resolved -> Loaded -> Computed -> Normalized -> Done
//!     \_________\__________\___________\______-> Failed
//! ```
//!
//! - **Resolved**: the transform is built from the registry with the task's
//!   arguments
//! - **Loaded**: configured measurements are read, resampled onto one grid
//!   (decimated in dry runs), renamed, and given a leading time axis
//! - **Computed**: the transform ran and its output matches what it declared
//! - **Normalized**: the time axis is dropped, `int8` bands are widened to
//!   `uint8` and the input CRS is carried forward if the output lacks one
//!
//! Every transition is logged with the task's dataset id. Load and compute
//! failures are not retried here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use eoforge_core::config::Resampling;

use crate::error::{Error, Result};
use crate::metrics::FlowMetrics;
use crate::raster::{Band, Measurement, RasterDataset};
use crate::resample::{common_grid, resample_band};
use crate::source::{LoadedBand, RasterSource};
use crate::task::Task;
use crate::transform::{check_contract, TransformRegistry};

/// Factor by which dry runs coarsen the load grid.
pub const DRY_RUN_DECIMATION: usize = 10;

/// Execution stage of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Nothing has happened yet.
    Pending,
    /// The transform was built.
    Resolved,
    /// Source data was loaded.
    Loaded,
    /// The transform produced output.
    Computed,
    /// Output was normalized for writing.
    Normalized,
    /// Finished.
    Done,
    /// Failed at some stage.
    Failed,
}

impl Stage {
    /// Whether moving to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Resolved)
                | (Self::Resolved, Self::Loaded)
                | (Self::Loaded, Self::Computed)
                | (Self::Computed, Self::Normalized)
                | (Self::Normalized, Self::Done)
        ) || (matches!(target, Self::Failed) && !self.is_terminal())
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Loaded => "loaded",
            Self::Computed => "computed",
            Self::Normalized => "normalized",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks and logs the stage of one execution.
#[derive(Debug)]
struct StageLog {
    dataset_id: String,
    stage: Stage,
}

impl StageLog {
    fn new(task: &Task) -> Self {
        Self {
            dataset_id: task.dataset().id.to_string(),
            stage: Stage::Pending,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(self.stage.can_transition_to(next));
        tracing::info!(dataset_id = %self.dataset_id, from = %self.stage, to = %next, "stage transition");
        FlowMetrics::new().record_stage_transition(self.stage.as_str(), next.as_str());
        self.stage = next;
    }

    fn fail(&mut self, err: Error) -> Error {
        tracing::error!(dataset_id = %self.dataset_id, stage = %self.stage, error = %err, "task failed");
        FlowMetrics::new().record_stage_transition(self.stage.as_str(), Stage::Failed.as_str());
        self.stage = Stage::Failed;
        err
    }
}

/// Output of a successful execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Normalized output data.
    pub data: RasterDataset,
    /// What the transform declared it would produce.
    pub declared: BTreeMap<String, Measurement>,
    /// Bands that were widened from `int8`.
    pub widened: Vec<String>,
}

/// Runs transforms against source data.
#[derive(Clone)]
pub struct TransformInvoker {
    registry: Arc<TransformRegistry>,
    source: Arc<dyn RasterSource>,
}

impl fmt::Debug for TransformInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformInvoker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl TransformInvoker {
    /// Creates an invoker.
    #[must_use]
    pub fn new(registry: Arc<TransformRegistry>, source: Arc<dyn RasterSource>) -> Self {
        Self { registry, source }
    }

    /// The registry transforms are resolved from.
    #[must_use]
    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Executes a task up to normalized output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformNotFound`], [`Error::TransformContractViolation`]
    /// or [`Error::TransformExecution`] depending on the failing stage, or
    /// [`Error::AccessDenied`] if source data could not be read for lack of
    /// permission.
    pub async fn execute(&self, task: &Task, dry_run: bool) -> Result<Invocation> {
        let mut log = StageLog::new(task);
        self.run(task, dry_run, &mut log).await.map_err(|e| log.fail(e))
    }

    async fn run(&self, task: &Task, dry_run: bool, log: &mut StageLog) -> Result<Invocation> {
        let name = task.transform_name().to_string();
        let transform = self.registry.resolve(&name, &task.transform_args())?;
        log.advance(Stage::Resolved);

        let data = self.load(task, dry_run).await?;
        log.advance(Stage::Loaded);

        let declared = transform.measurements(&data.measurements())?;
        let input_crs = data.crs.clone();
        let mut output = tokio::task::spawn_blocking(move || transform.compute(data)).await??;
        check_contract(&name, &declared, &output)?;
        log.advance(Stage::Computed);

        output.squeeze_time();
        let widened = output.widen_int8();
        if !widened.is_empty() {
            tracing::info!(bands = ?widened, "found int8 output bands, converting to uint8");
        }
        if output.crs.is_none() {
            output.crs = input_crs;
        }
        log.advance(Stage::Normalized);

        log.advance(Stage::Done);
        Ok(Invocation {
            data: output,
            declared,
            widened,
        })
    }

    async fn load(&self, task: &Task, dry_run: bool) -> Result<RasterDataset> {
        let spec = &task.config().specification;
        let dataset = task.dataset();

        let mut loaded: Vec<(String, LoadedBand)> = Vec::with_capacity(spec.measurements.len());
        for measurement in &spec.measurements {
            let band = self.source.read_band(dataset, measurement).await?;
            loaded.push((measurement.clone(), band));
        }

        let grid = common_grid(
            loaded.iter().map(|(name, b)| (name.as_str(), &b.geobox)),
            spec.basis.as_deref(),
        )
        .ok_or_else(|| Error::execution("no measurements were loaded"))?;
        let grid = if dry_run {
            grid.decimate(DRY_RUN_DECIMATION)
        } else {
            grid
        };

        let crs = loaded
            .iter()
            .find_map(|(_, b)| b.crs.clone())
            .or_else(|| dataset.crs.clone());
        if let Some(crs) = &crs {
            for (name, band) in &loaded {
                if band.crs.as_ref().is_some_and(|c| c != crs) {
                    tracing::warn!(band = %name, crs = ?band.crs, expected = %crs, "band CRS differs");
                }
            }
        }

        let methods: Vec<Resampling> = loaded
            .iter()
            .map(|(name, _)| {
                spec.resampling
                    .as_ref()
                    .map(|policy| policy.for_band(name))
                    .unwrap_or_default()
            })
            .collect();
        let bands = tokio::task::spawn_blocking(move || {
            loaded
                .into_iter()
                .zip(methods)
                .map(|((name, b), method)| {
                    resample_band(&b.band, &b.geobox, &grid, method).map(|band| (name, band))
                })
                .collect::<Result<BTreeMap<String, Band>>>()
        })
        .await??;

        let mut data = RasterDataset::new(grid);
        data.crs = crs;
        data.bands = bands;
        data.rename(&spec.measurement_renames)?;

        data.add_time_axis(dataset.datetime.into_iter().collect());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DatasetRecord;
    use crate::raster::{Affine, BandData, DType, GeoBox};
    use crate::source::MemorySource;
    use eoforge_core::{Configuration, DatasetId};
    use ndarray::{ArrayD, IxDyn};

    fn config(transform: &str, extra: &str) -> Arc<Configuration> {
        let yaml = format!(
            "specification:\n  product: p\n  measurements: [nir, red]\n  transform: {transform}\n{extra}output:\n  location: /tmp/out\n"
        );
        Arc::new(Configuration::from_yaml_str(&yaml).expect("config"))
    }

    fn band(value: i16, size: usize, pixel: f64) -> LoadedBand {
        LoadedBand {
            band: Band::new(BandData::Int16(ArrayD::from_elem(vec![size, size], value))).with_nodata(-999.0),
            geobox: GeoBox::new(size, size, Affine::north_up(0.0, 0.0, pixel, pixel)),
            crs: Some("EPSG:32655".into()),
        }
    }

    fn setup(transform: &str, extra: &str) -> (TransformInvoker, Task) {
        let record = DatasetRecord::new(DatasetId::generate(), "p");
        let source = MemorySource::new();
        source.insert(record.id, "nir", band(300, 20, 10.0)).expect("insert");
        source.insert(record.id, "red", band(100, 10, 20.0)).expect("insert");
        let invoker = TransformInvoker::new(
            Arc::new(TransformRegistry::with_builtins()),
            Arc::new(source),
        );
        (invoker, Task::new(Arc::new(record), config(transform, extra)))
    }

    #[tokio::test]
    async fn loads_onto_finest_grid_and_drops_time() -> Result<()> {
        let (invoker, task) = setup("normalized_difference", "");
        let out = invoker.execute(&task, false).await?;
        let ndvi = &out.data.bands["ndvi"];
        assert_eq!(ndvi.data.shape(), &[20, 20]);
        assert_eq!(ndvi.data.dtype(), DType::Float32);
        assert!((ndvi.data.values_f64()[0] - 0.5).abs() < 1e-6);
        assert_eq!(out.data.crs.as_deref(), Some("EPSG:32655"));
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_decimates() -> Result<()> {
        let (invoker, task) = setup("passthrough", "");
        let out = invoker.execute(&task, true).await?;
        assert_eq!(out.data.bands["nir"].data.shape(), &[2, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn renames_apply_after_load() -> Result<()> {
        let (invoker, task) = setup(
            "passthrough",
            "  measurement_renames:\n    nir: nbart_nir\n",
        );
        let out = invoker.execute(&task, false).await?;
        assert!(out.data.bands.contains_key("nbart_nir"));
        assert!(!out.data.bands.contains_key("nir"));
        Ok(())
    }

    #[tokio::test]
    async fn swapped_renames_keep_both_bands() -> Result<()> {
        let (invoker, task) = setup(
            "passthrough",
            "  measurement_renames:\n    nir: red\n    red: nir\n",
        );
        let out = invoker.execute(&task, false).await?;
        assert_eq!(out.data.bands.len(), 2);
        assert!(out.data.bands["red"].data.values_f64().iter().all(|v| *v == 300.0));
        assert!(out.data.bands["nir"].data.values_f64().iter().all(|v| *v == 100.0));
        Ok(())
    }

    #[tokio::test]
    async fn int8_output_is_widened() -> Result<()> {
        let (invoker, task) = setup("threshold", "  transform_args:\n    band: nir\n    value: 10\n");
        let out = invoker.execute(&task, false).await?;
        assert_eq!(out.widened, vec!["class".to_string()]);
        let class = &out.data.bands["class"];
        assert_eq!(class.data.dtype(), DType::Uint8);
        assert!(class.data.values_f64().iter().all(|v| *v == 1.0));
        Ok(())
    }

    #[tokio::test]
    async fn missing_measurement_fails_execution() {
        let (invoker, task) = setup("passthrough", "");
        let config = Configuration::from_yaml_str(
            "specification:\n  product: p\n  measurements: [swir1]\n  transform: passthrough\noutput:\n  location: /tmp/out\n",
        )
        .expect("config");
        let task = Task::new(task.dataset_arc(), Arc::new(config));
        let err = invoker.execute(&task, false).await.unwrap_err();
        assert!(matches!(err, Error::TransformExecution { .. }));
    }

    #[tokio::test]
    async fn contract_violation_is_reported() {
        struct Liar;
        impl crate::transform::Transform for Liar {
            fn measurements(
                &self,
                _: &BTreeMap<String, Measurement>,
            ) -> Result<BTreeMap<String, Measurement>> {
                Ok(BTreeMap::from([("x".to_string(), Measurement::new("x", DType::Float32))]))
            }
            fn compute(&self, data: RasterDataset) -> Result<RasterDataset> {
                let shape = IxDyn(&[1, data.geobox.height, data.geobox.width]);
                Ok(RasterDataset::new(data.geobox)
                    .with_band("x", Band::new(BandData::Float64(ArrayD::zeros(shape)))))
            }
        }

        let (_, task) = setup("liar", "");
        let record = task.dataset_arc();
        let source = MemorySource::new();
        source.insert(record.id, "nir", band(1, 4, 10.0)).expect("insert");
        source.insert(record.id, "red", band(1, 4, 10.0)).expect("insert");
        let registry = TransformRegistry::new().with_transform("liar", "1.0.0", "", |_| {
            Ok(Box::new(Liar) as Box<dyn crate::transform::Transform>)
        });
        let invoker = TransformInvoker::new(Arc::new(registry), Arc::new(source));
        let err = invoker.execute(&task, false).await.unwrap_err();
        assert!(matches!(err, Error::TransformContractViolation { .. }));
    }

    #[test]
    fn stage_transitions() {
        assert!(Stage::Pending.can_transition_to(Stage::Resolved));
        assert!(Stage::Loaded.can_transition_to(Stage::Failed));
        assert!(!Stage::Resolved.can_transition_to(Stage::Computed));
        assert!(!Stage::Done.can_transition_to(Stage::Failed));
    }
}

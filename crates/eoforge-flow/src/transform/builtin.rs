//! Built-in transforms.
//!
//! | Name | Output |
//! |---|---|
//! | `passthrough` | the input bands unchanged |
//! | `normalized_difference` | `(a - b) / (a + b)` as `float32`, NaN where undefined |
//! | `threshold` | `int8` class band: 1 above the threshold, 0 otherwise |

use std::collections::BTreeMap;

use ndarray::{ArrayD, Zip};
use serde::Deserialize;
use serde_json::Value;

use super::{Transform, TransformRegistry};
use crate::error::{Error, Result};
use crate::raster::{Band, BandData, DType, Measurement, RasterDataset};

const URL: &str = "https://github.com/eoforge/eoforge";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Registers every built-in transform.
pub fn register_all(registry: &mut TransformRegistry) {
    registry.register("passthrough", VERSION, URL, |_| Ok(Box::new(Passthrough)));
    registry.register("normalized_difference", VERSION, URL, |args| {
        Ok(Box::new(NormalizedDifference::from_args(args)?))
    });
    registry.register("threshold", VERSION, URL, |args| {
        Ok(Box::new(Threshold::from_args(args)?))
    });
}

fn parse_args<T: for<'de> Deserialize<'de> + Default>(name: &str, args: &Value) -> Result<T> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args.clone())
        .map_err(|e| Error::configuration(format!("invalid arguments for {name}: {e}")))
}

/// Reads a band as `f64` with its nodata pixels replaced by NaN.
fn masked(data: &RasterDataset, band: &str) -> Result<ArrayD<f64>> {
    let band = data
        .bands
        .get(band)
        .ok_or_else(|| Error::execution(format!("input measurement '{band}' is not loaded")))?;
    let mut values = band.data.to_f64();
    if let Some(nodata) = band.nodata {
        values.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }
    Ok(values)
}

fn require(inputs: &BTreeMap<String, Measurement>, band: &str) -> Result<()> {
    if inputs.contains_key(band) {
        Ok(())
    } else {
        Err(Error::execution(format!("input measurement '{band}' is not configured")))
    }
}

/// Writes its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transform for Passthrough {
    fn measurements(
        &self,
        inputs: &BTreeMap<String, Measurement>,
    ) -> Result<BTreeMap<String, Measurement>> {
        Ok(inputs.clone())
    }

    fn compute(&self, data: RasterDataset) -> Result<RasterDataset> {
        Ok(data)
    }
}

/// Normalized difference of two bands, e.g. NDVI from `nir` and `red`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizedDifference {
    /// First band.
    pub band_a: String,
    /// Second band.
    pub band_b: String,
    /// Output band name.
    pub output: String,
}

impl Default for NormalizedDifference {
    fn default() -> Self {
        Self {
            band_a: "nir".into(),
            band_b: "red".into(),
            output: "ndvi".into(),
        }
    }
}

impl NormalizedDifference {
    /// Builds the transform from job arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for unknown or mistyped arguments.
    pub fn from_args(args: &Value) -> Result<Self> {
        parse_args("normalized_difference", args)
    }
}

impl Transform for NormalizedDifference {
    fn measurements(
        &self,
        inputs: &BTreeMap<String, Measurement>,
    ) -> Result<BTreeMap<String, Measurement>> {
        require(inputs, &self.band_a)?;
        require(inputs, &self.band_b)?;
        Ok(BTreeMap::from([(
            self.output.clone(),
            Measurement::new(&self.output, DType::Float32).with_nodata(f64::NAN),
        )]))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn compute(&self, data: RasterDataset) -> Result<RasterDataset> {
        let a = masked(&data, &self.band_a)?;
        let b = masked(&data, &self.band_b)?;
        if a.shape() != b.shape() {
            return Err(Error::execution(format!(
                "{} and {} have different shapes",
                self.band_a, self.band_b
            )));
        }
        let values = Zip::from(&a).and(&b).map_collect(|&a, &b| {
            let sum = a + b;
            if sum == 0.0 {
                f32::NAN
            } else {
                ((a - b) / sum) as f32
            }
        });

        let mut out = RasterDataset::new(data.geobox);
        out.crs = data.crs;
        out.time = data.time;
        let mut band = Band::new(BandData::Float32(values)).with_nodata(f64::NAN);
        band.units = "1".into();
        out.bands.insert(self.output.clone(), band);
        Ok(out)
    }
}

/// Classifies a band against a threshold.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Threshold {
    /// Band to classify.
    pub band: String,
    /// Pixels strictly above this value are class 1.
    pub value: f64,
    /// Output band name.
    pub output: String,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            band: "ndvi".into(),
            value: 0.0,
            output: "class".into(),
        }
    }
}

impl Threshold {
    /// Builds the transform from job arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for unknown or mistyped arguments.
    pub fn from_args(args: &Value) -> Result<Self> {
        parse_args("threshold", args)
    }
}

impl Transform for Threshold {
    fn measurements(
        &self,
        inputs: &BTreeMap<String, Measurement>,
    ) -> Result<BTreeMap<String, Measurement>> {
        require(inputs, &self.band)?;
        Ok(BTreeMap::from([(
            self.output.clone(),
            Measurement::new(&self.output, DType::Int8),
        )]))
    }

    fn compute(&self, data: RasterDataset) -> Result<RasterDataset> {
        let values = masked(&data, &self.band)?;
        let classes = values.mapv(|v| i8::from(v > self.value));

        let mut out = RasterDataset::new(data.geobox);
        out.crs = data.crs;
        out.time = data.time;
        out.bands
            .insert(self.output.clone(), Band::new(BandData::Int8(classes)));
        Ok(out)
    }
}

//! Typed job configuration.
//!
//! A job is described by a YAML document with three sections:
//!
//! ```yaml
//! specification:
//!   product: ga_ls8c_ard_3
//!   measurements: [nbart_red, nbart_nir]
//!   transform: normalized_difference
//!   transform_args:
//!     band_a: nbart_nir
//!     band_b: nbart_red
//! output:
//!   location: s3://bucket/derivative
//!   metadata:
//!     product_family: ndvi
//!     dataset_version: 1.0.0
//! processing:
//!   chunks: {x: 1024, y: 1024}
//! ```
//!
//! [`Configuration::from_yaml_str`] parses and validates in one step. Every
//! failure is reported as [`Error::Configuration`] before any dataset is
//! touched. Once built, a configuration is never mutated; tasks share it
//! through an `Arc`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Resampling method used when bringing bands onto a common grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    /// Nearest neighbour.
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Bilinear,
    /// Mean of contributing pixels.
    Average,
    /// Most common contributing value.
    Mode,
    /// Minimum of contributing pixels.
    Min,
    /// Maximum of contributing pixels.
    Max,
    /// Median of contributing pixels.
    Med,
}

impl Resampling {
    /// Returns the lowercase method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Average => "average",
            Self::Mode => "mode",
            Self::Min => "min",
            Self::Max => "max",
            Self::Med => "med",
        }
    }
}

impl fmt::Display for Resampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "average" => Ok(Self::Average),
            "mode" => Ok(Self::Mode),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "med" | "median" => Ok(Self::Med),
            other => Err(Error::configuration(format!(
                "unknown resampling method '{other}'"
            ))),
        }
    }
}

/// Either one resampling method for every band, or a per-band table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResamplingPolicy {
    /// Same method for all bands.
    Uniform(Resampling),
    /// Method per band name. Bands not listed use `*` if present, else nearest.
    PerBand(BTreeMap<String, Resampling>),
}

impl ResamplingPolicy {
    /// Resolves the method for one band.
    #[must_use]
    pub fn for_band(&self, band: &str) -> Resampling {
        match self {
            Self::Uniform(method) => *method,
            Self::PerBand(table) => table
                .get(band)
                .or_else(|| table.get("*"))
                .copied()
                .unwrap_or_default(),
        }
    }
}

/// Options passed to the band writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Resampling used when building overviews.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview_resampling: Option<Resampling>,
    /// Other writer options, preserved untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Single-band preview settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinglebandPreview {
    /// Band rendered into the preview.
    pub measurement: String,
    /// Optional value → RGB colour table. Unlisted values render as grey scale.
    #[serde(default, deserialize_with = "nullable")]
    pub lookup_table: BTreeMap<String, [u8; 3]>,
}

/// What to process and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Measurements loaded from each source dataset.
    pub measurements: Vec<String>,
    /// Registry name of the transform.
    pub transform: String,
    /// Where the transform's documentation or source lives.
    #[serde(default)]
    pub transform_url: Option<String>,
    /// Single input product.
    #[serde(default)]
    pub product: Option<String>,
    /// Several input products, searched in order.
    #[serde(default)]
    pub products: Option<Vec<String>>,
    /// Renames applied after loading.
    #[serde(default, deserialize_with = "nullable")]
    pub measurement_renames: BTreeMap<String, String>,
    /// Arguments shared by every product.
    #[serde(default)]
    pub transform_args: Option<Value>,
    /// Arguments keyed by product name. Takes precedence over `transform_args`.
    #[serde(default, deserialize_with = "nullable")]
    pub transform_args_per_product: BTreeMap<String, Value>,
    /// Resampling used to bring bands onto a common grid.
    #[serde(default)]
    pub resampling: Option<ResamplingPolicy>,
    /// Product family written to metadata instead of the configured one.
    #[serde(default)]
    pub override_product_family: Option<String>,
    /// Band whose grid every other band is resampled onto.
    #[serde(default)]
    pub basis: Option<String>,
    /// Read public buckets without signing.
    #[serde(default = "default_true")]
    pub aws_unsigned: bool,
}

/// Where and how outputs are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Destination: a filesystem path or `s3://bucket/prefix`.
    pub location: String,
    /// Options for the band writer.
    #[serde(default, deserialize_with = "nullable")]
    pub write_data_settings: WriteOptions,
    /// Nodata value stamped on every output band.
    #[serde(default)]
    pub nodata: Option<f64>,
    /// Red, green and blue bands for the preview.
    #[serde(default, deserialize_with = "rgb_bands")]
    pub preview_image: Option<[String; 3]>,
    /// Single-band preview.
    #[serde(default)]
    pub preview_image_singleband: Option<SinglebandPreview>,
    /// Naming metadata (`product_family`, `dataset_version`, `producer`, ...).
    #[serde(default, deserialize_with = "string_map")]
    pub metadata: BTreeMap<String, String>,
    /// Extra properties written verbatim into the output metadata.
    #[serde(default, deserialize_with = "nullable")]
    pub properties: BTreeMap<String, Value>,
    /// Record the input dataset as lineage.
    #[serde(default = "default_true")]
    pub reference_source_dataset: bool,
    /// Write a STAC item next to the package.
    #[serde(default)]
    pub write_stac: bool,
    /// Copy the source footprint onto the output.
    #[serde(default = "default_true")]
    pub inherit_geometry: bool,
    /// Explorer base URL used for STAC links.
    #[serde(default)]
    pub explorer_url: Option<String>,
}

/// Execution tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    /// Chunk sizes per dimension used by the loader.
    #[serde(default, alias = "dask_chunks", deserialize_with = "nullable")]
    pub chunks: BTreeMap<String, usize>,
    /// Parallel task bound for batch runs.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Connection parameters for an external compute cluster.
    #[serde(default, alias = "dask_client", deserialize_with = "nullable")]
    pub cluster: BTreeMap<String, Value>,
}

/// A complete job configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// What to process.
    pub specification: Specification,
    /// Where outputs go.
    pub output: OutputSettings,
    /// Execution tuning.
    #[serde(default, deserialize_with = "nullable")]
    pub processing: ProcessingSettings,
}

impl Configuration {
    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] on malformed YAML, schema mismatch,
    /// unknown enum values, or failed validation.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| Error::configuration(format!("invalid configuration document: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from an already parsed document.
    ///
    /// # Errors
    ///
    /// Same as [`Configuration::from_yaml_str`].
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| Error::configuration(format!("invalid configuration document: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let spec = &self.specification;
        if spec.transform.trim().is_empty() {
            return Err(Error::configuration("specification.transform is empty"));
        }
        if spec.measurements.is_empty() {
            return Err(Error::configuration(
                "specification.measurements must list at least one band",
            ));
        }
        match (&spec.product, &spec.products) {
            (None, None) => {
                return Err(Error::configuration(
                    "one of specification.product or specification.products is required",
                ));
            }
            (None, Some(products)) if products.is_empty() => {
                return Err(Error::configuration("specification.products is empty"));
            }
            (Some(product), Some(products)) => {
                tracing::warn!(
                    product = %product,
                    products = ?products,
                    "both product and products are configured; using product"
                );
            }
            _ => {}
        }
        if self.output.location.trim().is_empty() {
            return Err(Error::configuration("output.location is empty"));
        }
        Ok(())
    }

    /// Input products in search order.
    ///
    /// `product` wins when both `product` and `products` are set.
    #[must_use]
    pub fn input_products(&self) -> Vec<String> {
        let spec = &self.specification;
        match (&spec.product, &spec.products) {
            (Some(product), _) => vec![product.clone()],
            (None, Some(products)) => products.clone(),
            (None, None) => Vec::new(),
        }
    }

    /// Transform arguments for datasets of `product`.
    ///
    /// A per-product entry wins over the shared arguments; with neither
    /// present the result is `Value::Null`.
    #[must_use]
    pub fn transform_args_for(&self, product: &str) -> Value {
        let spec = &self.specification;
        spec.transform_args_per_product
            .get(product)
            .or(spec.transform_args.as_ref())
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// The `dataset_version` naming value, if configured.
    #[must_use]
    pub fn dataset_version(&self) -> Option<&str> {
        self.output.metadata.get("dataset_version").map(String::as_str)
    }

    /// Serializes back to YAML.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if YAML encoding fails.
    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

const fn default_true() -> bool {
    true
}

/// Treats an explicit YAML `null` the same as an absent key.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts scalar values and stringifies them, so `dataset_version: 3` works.
fn string_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k, s)),
            Value::Number(n) => Ok((k, n.to_string())),
            Value::Bool(b) => Ok((k, b.to_string())),
            other => Err(D::Error::custom(format!(
                "metadata value for '{k}' must be a scalar, got {other}"
            ))),
        })
        .collect()
}

fn rgb_bands<'de, D>(deserializer: D) -> std::result::Result<Option<[String; 3]>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;

    let raw: Option<Vec<String>> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(bands) => {
            let len = bands.len();
            <[String; 3]>::try_from(bands).map(Some).map_err(|_| {
                D::Error::custom(format!("preview_image needs exactly 3 bands, got {len}"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
specification:
  product: ga_ls8c_ard_3
  measurements: [nbart_red, nbart_nir]
  transform: normalized_difference
output:
  location: /tmp/out
";

    #[test]
    fn minimal_document_gets_defaults() {
        let config = Configuration::from_yaml_str(MINIMAL).expect("parse");
        assert!(config.specification.aws_unsigned);
        assert!(config.output.reference_source_dataset);
        assert!(config.output.inherit_geometry);
        assert!(!config.output.write_stac);
        assert!(config.output.metadata.is_empty());
        assert_eq!(config.processing, ProcessingSettings::default());
        assert_eq!(config.input_products(), vec!["ga_ls8c_ard_3".to_string()]);
    }

    #[test]
    fn missing_products_is_a_configuration_error() {
        let doc = r"
specification:
  measurements: [red]
  transform: passthrough
output:
  location: /tmp/out
";
        let err = Configuration::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn product_is_preferred_over_products() {
        let doc = r"
specification:
  product: first
  products: [second, third]
  measurements: [red]
  transform: passthrough
output:
  location: /tmp/out
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        assert_eq!(config.input_products(), vec!["first".to_string()]);
    }

    #[test]
    fn products_keep_configured_order() {
        let doc = r"
specification:
  products: [c, a, b]
  measurements: [red]
  transform: passthrough
output:
  location: /tmp/out
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        assert_eq!(config.input_products(), vec!["c", "a", "b"]);
    }

    #[test]
    fn unknown_resampling_fails_loading() {
        let doc = r"
specification:
  product: p
  measurements: [red]
  transform: passthrough
  resampling: cubic_wobble
output:
  location: /tmp/out
";
        let err = Configuration::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn resampling_accepts_uniform_and_per_band() {
        let doc = r"
specification:
  product: p
  measurements: [red, fmask]
  transform: passthrough
  resampling:
    red: bilinear
    '*': nearest
output:
  location: /tmp/out
  write_data_settings:
    overview_resampling: average
    compress: deflate
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        let policy = config.specification.resampling.expect("policy");
        assert_eq!(policy.for_band("red"), Resampling::Bilinear);
        assert_eq!(policy.for_band("fmask"), Resampling::Nearest);

        let write = &config.output.write_data_settings;
        assert_eq!(write.overview_resampling, Some(Resampling::Average));
        assert_eq!(write.extra.get("compress"), Some(&Value::from("deflate")));

        assert_eq!(
            ResamplingPolicy::Uniform(Resampling::Max).for_band("anything"),
            Resampling::Max
        );
    }

    #[test]
    fn per_product_args_win_over_shared_args() {
        let doc = r"
specification:
  products: [ls8, ls9]
  measurements: [red]
  transform: passthrough
  transform_args: {scale: 1}
  transform_args_per_product:
    ls9: {scale: 2}
output:
  location: /tmp/out
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        assert_eq!(config.transform_args_for("ls9"), serde_json::json!({"scale": 2}));
        assert_eq!(config.transform_args_for("ls8"), serde_json::json!({"scale": 1}));
    }

    #[test]
    fn absent_args_bind_to_null() {
        let config = Configuration::from_yaml_str(MINIMAL).expect("parse");
        assert_eq!(config.transform_args_for("ga_ls8c_ard_3"), Value::Null);
    }

    #[test]
    fn metadata_scalars_are_stringified() {
        let doc = r"
specification:
  product: p
  measurements: [red]
  transform: passthrough
  measurement_renames:
output:
  location: /tmp/out
  metadata:
    product_family: ndvi
    dataset_version: 3
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        assert_eq!(config.dataset_version(), Some("3"));
        assert!(config.specification.measurement_renames.is_empty());
    }

    #[test]
    fn preview_needs_three_bands() {
        let doc = r"
specification:
  product: p
  measurements: [red]
  transform: passthrough
output:
  location: /tmp/out
  preview_image: [red, green]
";
        assert!(matches!(
            Configuration::from_yaml_str(doc),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn legacy_processing_keys_are_accepted() {
        let doc = r"
specification:
  product: p
  measurements: [red]
  transform: passthrough
output:
  location: /tmp/out
processing:
  dask_chunks: {x: 2048, y: 2048}
  dask_client: {n_workers: 2}
";
        let config = Configuration::from_yaml_str(doc).expect("parse");
        assert_eq!(config.processing.chunks.get("x"), Some(&2048));
        assert_eq!(
            config.processing.cluster.get("n_workers"),
            Some(&Value::from(2))
        );
    }

    #[test]
    fn yaml_roundtrip_preserves_configuration() {
        let config = Configuration::from_yaml_str(MINIMAL).expect("parse");
        let text = config.to_yaml_string().expect("to yaml");
        let again = Configuration::from_yaml_str(&text).expect("reparse");
        assert_eq!(config, again);
    }
}

//! Transforms and the transform registry.
//!
//! A transform is a two-operation contract:
//!
//! - [`Transform::measurements`] declares the output bands for a given set of
//!   input bands
//! - [`Transform::compute`] turns loaded input data into output data
//!
//! Transforms are looked up by name in a [`TransformRegistry`] populated at
//! startup. Each entry carries a factory that builds a configured transform
//! from the job's arguments, plus the version and URL noted in output
//! metadata.

pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use eoforge_core::identity::major_minor;

use crate::error::{Error, Result};
use crate::raster::{Measurement, RasterDataset};

/// A configured transform.
pub trait Transform: Send + Sync {
    /// Declares output bands for the given input bands.
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs cannot feed this transform.
    fn measurements(
        &self,
        inputs: &BTreeMap<String, Measurement>,
    ) -> Result<BTreeMap<String, Measurement>>;

    /// Computes output data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformExecution`] if the computation fails.
    fn compute(&self, data: RasterDataset) -> Result<RasterDataset>;
}

/// Builds a transform from its arguments (`null` when none are configured).
pub type TransformFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Transform>> + Send + Sync>;

/// Version information for a registered transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformInfo {
    /// Registry name.
    pub name: String,
    /// Package version, possibly empty.
    pub version: String,
    /// Where the transform's source lives, possibly empty.
    pub url: String,
}

impl TransformInfo {
    /// The version reduced to `major.minor`.
    #[must_use]
    pub fn version_major_minor(&self) -> String {
        major_minor(&self.version)
    }
}

#[derive(Clone)]
struct Entry {
    factory: TransformFactory,
    info: TransformInfo,
}

/// Name to transform factory.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    entries: HashMap<String, Entry>,
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}

impl TransformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in transforms.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Registers a transform, replacing any previous entry with that name.
    pub fn register<F>(&mut self, name: &str, version: &str, url: &str, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            Entry {
                factory: Arc::new(factory),
                info: TransformInfo {
                    name: name.to_string(),
                    version: version.to_string(),
                    url: url.to_string(),
                },
            },
        );
    }

    /// Builder form of [`TransformRegistry::register`].
    #[must_use]
    pub fn with_transform<F>(mut self, name: &str, version: &str, url: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn Transform>> + Send + Sync + 'static,
    {
        self.register(name, version, url, factory);
        self
    }

    /// Builds the named transform with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformNotFound`] for unknown names, or whatever the
    /// factory returns for bad arguments.
    pub fn resolve(&self, name: &str, args: &Value) -> Result<Box<dyn Transform>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| Error::TransformNotFound {
                name: name.to_string(),
            })?;
        (entry.factory)(args)
    }

    /// Version information, if registered.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<&TransformInfo> {
        self.entries.get(name).map(|e| &e.info)
    }

    /// `major.minor` version of the named transform; empty when unregistered.
    #[must_use]
    pub fn version_major_minor(&self, name: &str) -> String {
        self.info(name)
            .map(TransformInfo::version_major_minor)
            .unwrap_or_default()
    }

    /// Whether a transform is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Checks computed output against what the transform declared.
///
/// # Errors
///
/// Returns [`Error::TransformContractViolation`] if a declared band is missing
/// or has a different pixel type.
pub fn check_contract(
    name: &str,
    declared: &BTreeMap<String, Measurement>,
    output: &RasterDataset,
) -> Result<()> {
    for (band, measurement) in declared {
        let produced = output
            .bands
            .get(band)
            .ok_or_else(|| Error::TransformContractViolation {
                name: name.to_string(),
                message: format!("declared measurement '{band}' was not produced"),
            })?;
        let dtype = produced.data.dtype();
        if dtype != measurement.dtype {
            return Err(Error::TransformContractViolation {
                name: name.to_string(),
                message: format!(
                    "measurement '{band}' declared as {} but produced as {dtype}",
                    measurement.dtype
                ),
            });
        }
    }
    Ok(())
}

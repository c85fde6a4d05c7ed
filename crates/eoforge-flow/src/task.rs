//! Units of work.
//!
//! A [`Task`] pairs one source dataset with the job configuration. Tasks are
//! immutable: the only override, the output location, produces a new task
//! ([`Task::with_output_location`]). Both halves are shared behind `Arc`, so
//! cloning a task is cheap and thousands of tasks share one configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use eoforge_core::identity::{identity, DATASET_VERSION_TAG};
use eoforge_core::{Configuration, DatasetId};

use crate::catalog::DatasetRecord;
use crate::error::Result;

/// One dataset to transform under one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    dataset: Arc<DatasetRecord>,
    config: Arc<Configuration>,
    output_location: Option<String>,
}

impl Task {
    /// Creates a task.
    #[must_use]
    pub const fn new(dataset: Arc<DatasetRecord>, config: Arc<Configuration>) -> Self {
        Self {
            dataset,
            config,
            output_location: None,
        }
    }

    /// Returns a copy of this task that writes to `location` instead.
    #[must_use]
    pub fn with_output_location(&self, location: impl Into<String>) -> Self {
        Self {
            dataset: Arc::clone(&self.dataset),
            config: Arc::clone(&self.config),
            output_location: Some(location.into()),
        }
    }

    /// The source dataset.
    #[must_use]
    pub fn dataset(&self) -> &DatasetRecord {
        &self.dataset
    }

    /// Shared handle to the source dataset.
    #[must_use]
    pub fn dataset_arc(&self) -> Arc<DatasetRecord> {
        Arc::clone(&self.dataset)
    }

    /// The job configuration.
    #[must_use]
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Shared handle to the job configuration.
    #[must_use]
    pub fn config_arc(&self) -> Arc<Configuration> {
        Arc::clone(&self.config)
    }

    /// Where the output goes: the override if set, else the configured location.
    #[must_use]
    pub fn output_location(&self) -> &str {
        self.output_location
            .as_deref()
            .unwrap_or(&self.config.output.location)
    }

    /// Registry name of the transform.
    #[must_use]
    pub fn transform_name(&self) -> &str {
        &self.config.specification.transform
    }

    /// Arguments for the transform factory, resolved for this dataset's product.
    #[must_use]
    pub fn transform_args(&self) -> Value {
        self.config.transform_args_for(&self.dataset.product)
    }

    /// Computes the deterministic output identity.
    ///
    /// A `dataset_version` in the output metadata is folded in as a tag, so
    /// bumping it produces new ids for otherwise identical outputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity document cannot be canonicalized.
    pub fn identity(&self, algorithm_version: &str) -> Result<TaskIdentity> {
        let mut tags = BTreeMap::new();
        match self.config.dataset_version() {
            Some(version) => {
                tags.insert(DATASET_VERSION_TAG.to_string(), version.to_string());
            }
            None => tracing::debug!("dataset_version not set, not used for the output id"),
        }
        let uuid = identity(
            self.transform_name(),
            algorithm_version,
            &[self.dataset.id],
            &tags,
        )?;
        Ok(TaskIdentity {
            id: DatasetId::from_uuid(uuid),
            algorithm: self.transform_name().to_string(),
            algorithm_version: algorithm_version.to_string(),
            source: self.dataset.id,
            tags,
        })
    }
}

/// A task's output id together with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdentity {
    /// The output dataset id.
    pub id: DatasetId,
    /// Transform name.
    pub algorithm: String,
    /// Transform version (`major.minor`, possibly empty).
    pub algorithm_version: String,
    /// Source dataset id.
    pub source: DatasetId,
    /// Extra tags folded into the id.
    pub tags: BTreeMap<String, String>,
}

impl TaskIdentity {
    /// Every value that went into the id, flattened for logging.
    #[must_use]
    pub fn values(&self) -> BTreeMap<String, String> {
        let mut values = self.tags.clone();
        values.insert("algorithm".into(), self.algorithm.clone());
        values.insert("algorithm_version".into(), self.algorithm_version.clone());
        values.insert("dataset.id".into(), self.source.to_string());
        values
    }
}

/// A task carried whole inside a queue message.
///
/// Older producers serialized the dataset and the full configuration into the
/// message instead of sending an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineTask {
    /// The source dataset.
    pub dataset: DatasetRecord,
    /// The configuration the producer used.
    pub settings: Configuration,
}

impl From<&Task> for InlineTask {
    fn from(task: &Task) -> Self {
        Self {
            dataset: task.dataset().clone(),
            settings: task.config().clone(),
        }
    }
}

impl From<InlineTask> for Task {
    fn from(inline: InlineTask) -> Self {
        Self::new(Arc::new(inline.dataset), Arc::new(inline.settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r"
specification:
  product: ga_ls8c_ard_3
  measurements: [nbart_red, nbart_nir]
  transform: normalized_difference
output:
  location: /tmp/out
  metadata:
    dataset_version: 1.0.0
";

    fn task() -> Task {
        let config = Configuration::from_yaml_str(CONFIG).expect("config");
        let record = DatasetRecord::new(DatasetId::generate(), "ga_ls8c_ard_3");
        Task::new(Arc::new(record), Arc::new(config))
    }

    #[test]
    fn override_returns_new_task() {
        let original = task();
        let moved = original.with_output_location("s3://bucket/prefix");
        assert_eq!(original.output_location(), "/tmp/out");
        assert_eq!(moved.output_location(), "s3://bucket/prefix");
        assert_eq!(moved.dataset(), original.dataset());
        assert!(Arc::ptr_eq(&moved.config_arc(), &original.config_arc()));
    }

    #[test]
    fn identity_is_stable_and_versioned() {
        let t = task();
        let a = t.identity("1.2").expect("identity");
        let b = t.identity("1.2").expect("identity");
        assert_eq!(a, b);
        assert_eq!(a.tags.get(DATASET_VERSION_TAG).map(String::as_str), Some("1.0.0"));
        assert_ne!(a.id, t.identity("1.3").expect("identity").id);

        let values = a.values();
        assert_eq!(values["algorithm"], "normalized_difference");
        assert_eq!(values["dataset.id"], t.dataset().id.to_string());
    }

    #[test]
    fn inline_task_round_trips() {
        let t = task();
        let inline = InlineTask::from(&t);
        let json = serde_json::to_string(&inline).expect("serialize");
        let back: InlineTask = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(Task::from(back).dataset(), t.dataset());
    }
}

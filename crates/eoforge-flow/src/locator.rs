//! Finding source datasets for a job.
//!
//! The locator turns ids or search filters into catalog records that the
//! configured job can process. Every stream it returns is lazy: the catalog
//! is not queried until the stream is polled, and polling stops as soon as
//! the requested limit is reached.
//!
//! ## Limits
//!
//! `find_many` walks the configured products in order. The per-product
//! limit caps each product's contribution before the global limit caps the
//! total, so `limit = 5, per_product_limit = 2` over three products yields
//! two, two and one.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use eoforge_core::{Configuration, DatasetId};

use crate::catalog::{Catalog, DatasetPredicate, DatasetRecord, DatasetStream, SearchFilter};
use crate::error::{Error, Result};
use crate::task::Task;

/// Resolves datasets against the job's configured products.
#[derive(Clone)]
pub struct DatasetLocator {
    catalog: Arc<dyn Catalog>,
    config: Arc<Configuration>,
}

impl std::fmt::Debug for DatasetLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetLocator")
            .field("products", &self.config.input_products())
            .finish_non_exhaustive()
    }
}

impl DatasetLocator {
    /// Creates a locator.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, config: Arc<Configuration>) -> Self {
        Self { catalog, config }
    }

    /// The catalog searched.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// The job configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<Configuration> {
        &self.config
    }

    /// Wraps a record into a task for this job.
    #[must_use]
    pub fn task(&self, record: DatasetRecord) -> Task {
        Task::new(Arc::new(record), Arc::clone(&self.config))
    }

    /// Resolves one id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the catalog has no such dataset,
    /// [`Error::WrongProduct`] if it belongs to a product the job does not
    /// process, or [`Error::Archived`] if it has been archived.
    pub async fn find_by_id(&self, id: DatasetId) -> Result<DatasetRecord> {
        let record = self
            .catalog
            .get(&id)
            .await?
            .ok_or(Error::NotFound { id })?;
        let expected = self.config.input_products();
        if !expected.contains(&record.product) {
            return Err(Error::WrongProduct {
                id,
                actual: record.product,
                expected,
            });
        }
        if record.archived {
            return Err(Error::Archived { id });
        }
        Ok(record)
    }

    /// Resolves several ids, yielding one result per id in input order.
    #[must_use]
    pub fn find_bulk(
        &self,
        ids: Vec<DatasetId>,
    ) -> BoxStream<'static, (DatasetId, Result<DatasetRecord>)> {
        let locator = self.clone();
        stream::iter(ids)
            .then(move |id| {
                let locator = locator.clone();
                async move { (id, locator.find_by_id(id).await) }
            })
            .boxed()
    }

    /// Searches every configured product in order.
    ///
    /// `None` limits are unbounded.
    #[must_use]
    pub fn find_many(
        &self,
        filter: &SearchFilter,
        limit: Option<usize>,
        per_product_limit: Option<usize>,
    ) -> DatasetStream {
        let catalog = Arc::clone(&self.catalog);
        let filter = filter.clone();
        let per_product = per_product_limit.unwrap_or(usize::MAX);
        stream::iter(self.config.input_products())
            .map(move |product| {
                tracing::debug!(product = %product, "searching product");
                catalog.search(&product, &filter).take(per_product)
            })
            .flatten()
            .take(limit.unwrap_or(usize::MAX))
            .boxed()
    }

    /// Searches for datasets whose output does not exist yet.
    ///
    /// A candidate is skipped when the catalog already holds a dataset with
    /// its deterministic output id, or when `predicate` rejects it. The
    /// `limit` counts yielded datasets, not candidates examined.
    #[must_use]
    pub fn find_unprocessed(
        &self,
        filter: &SearchFilter,
        limit: Option<usize>,
        algorithm_version: &str,
        predicate: Option<DatasetPredicate>,
    ) -> DatasetStream {
        let locator = self.clone();
        let version = algorithm_version.to_string();
        self.find_many(filter, None, None)
            .try_filter(move |record| {
                let keep = predicate.as_ref().is_none_or(|p| p.matches(record));
                if !keep {
                    tracing::debug!(dataset_id = %record.id, "rejected by predicate");
                }
                std::future::ready(keep)
            })
            .try_filter_map(move |record| {
                let locator = locator.clone();
                let version = version.clone();
                async move {
                    let task = locator.task(record);
                    let output = task.identity(&version)?.id;
                    if locator.catalog.contains(&output).await? {
                        tracing::debug!(
                            dataset_id = %task.dataset().id,
                            output_id = %output,
                            "already processed"
                        );
                        return Ok(None);
                    }
                    Ok(Some(task.dataset().clone()))
                }
            })
            .take(limit.unwrap_or(usize::MAX))
            .boxed()
    }
}

//! In-memory catalog for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence
//! - Search results are a snapshot taken when the stream is first polled

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use eoforge_core::DatasetId;

use super::{Catalog, DatasetRecord, DatasetStream, SearchFilter};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct CatalogState {
    records: HashMap<DatasetId, DatasetRecord>,
    /// Insertion order, so search results are stable.
    order: Vec<DatasetId>,
}

/// In-memory catalog.
///
/// Records are returned by `search` in insertion order. The number of records
/// yielded by search streams is counted, which lets tests observe how far a
/// lazy consumer actually pulled.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
    yielded: Arc<AtomicUsize>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("catalog lock poisoned")
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, record: DatasetRecord) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if state.records.insert(record.id, record.clone()).is_none() {
            state.order.push(record.id);
        }
        drop(state);
        Ok(())
    }

    /// Adds several records.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn extend(&self, records: impl IntoIterator<Item = DatasetRecord>) -> Result<()> {
        records.into_iter().try_for_each(|r| self.insert(r))
    }

    /// Number of records yielded by search streams so far.
    #[must_use]
    pub fn yielded(&self) -> usize {
        self.yielded.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poison_err)?.records.len())
    }

    /// Whether the catalog is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn snapshot(&self, product: &str, filter: &SearchFilter) -> Result<Vec<DatasetRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .filter(|r| r.product == product && !r.archived && filter.matches(r))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get(&self, id: &DatasetId) -> Result<Option<DatasetRecord>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.records.get(id).cloned())
    }

    fn search(&self, product: &str, filter: &SearchFilter) -> DatasetStream {
        let catalog = self.clone();
        let product = product.to_string();
        let filter = filter.clone();

        stream::once(async move { catalog.snapshot(&product, &filter).map(|r| (r, catalog)) })
            .flat_map(|snapshot| match snapshot {
                Ok((records, catalog)) => stream::iter(records)
                    .map(move |r| {
                        catalog.yielded.fetch_add(1, Ordering::SeqCst);
                        Ok(r)
                    })
                    .boxed(),
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn record(product: &str) -> DatasetRecord {
        DatasetRecord::new(DatasetId::generate(), product)
    }

    #[tokio::test]
    async fn get_returns_archived_records() -> Result<()> {
        let catalog = InMemoryCatalog::new();
        let archived = record("p").archived();
        let id = archived.id;
        catalog.insert(archived)?;

        let found = catalog.get(&id).await?.expect("record");
        assert!(found.archived);
        assert!(catalog.get(&DatasetId::generate()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn search_filters_product_and_archived() -> Result<()> {
        let catalog = InMemoryCatalog::new();
        let a = record("p");
        let b = record("p");
        catalog.extend([a.clone(), record("q"), record("p").archived(), b.clone()])?;

        let found: Vec<DatasetRecord> = catalog.search("p", &SearchFilter::new()).try_collect().await?;
        assert_eq!(found, vec![a, b]);
        Ok(())
    }

    #[tokio::test]
    async fn search_is_lazy() -> Result<()> {
        let catalog = InMemoryCatalog::new();
        catalog.extend((0..10).map(|_| record("p")))?;

        let stream = catalog.search("p", &SearchFilter::new());
        assert_eq!(catalog.yielded(), 0);

        let first_three: Vec<_> = stream.take(3).try_collect().await?;
        assert_eq!(first_three.len(), 3);
        assert_eq!(catalog.yielded(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn reinsert_replaces_without_duplicating() -> Result<()> {
        let catalog = InMemoryCatalog::new();
        let r = record("p");
        catalog.insert(r.clone())?;
        catalog.insert(r.with_property("x", 1))?;
        assert_eq!(catalog.len()?, 1);
        Ok(())
    }
}

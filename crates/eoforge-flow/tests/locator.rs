//! Dataset selection for a job.

use futures::TryStreamExt;

use eoforge_core::DatasetId;
use eoforge_flow::catalog::{DatasetPredicate, DatasetRecord, SearchFilter};
use eoforge_flow::error::{Error, Result};
use eoforge_test_utils::JobFixture;

#[tokio::test]
async fn per_product_limit_applies_before_the_overall_limit() -> Result<()> {
    let fixture = JobFixture::new(&["a", "b", "c"]);
    for product in ["a", "b", "c"] {
        fixture.add_datasets(product, 3);
    }

    let found: Vec<DatasetRecord> = fixture
        .context()
        .locator()
        .find_many(&SearchFilter::new(), Some(5), Some(2))
        .try_collect()
        .await?;
    let products: Vec<&str> = found.iter().map(|r| r.product.as_str()).collect();
    assert_eq!(products, ["a", "a", "b", "b", "c"]);
    Ok(())
}

#[tokio::test]
async fn search_filters_narrow_each_product() -> Result<()> {
    let fixture = JobFixture::new(&["a"]);
    fixture.add_datasets("a", 5);
    let filter = SearchFilter::parse_expressions(&["time=2020-01-02/2020-01-03"])?;

    let found: Vec<DatasetRecord> = fixture
        .context()
        .locator()
        .find_many(&filter, None, None)
        .try_collect()
        .await?;
    assert_eq!(found.len(), 2);
    Ok(())
}

#[tokio::test]
async fn ids_from_other_products_are_rejected() -> Result<()> {
    let fixture = JobFixture::new(&["a"]);
    let ours = fixture.add_dataset("a", 1);
    let theirs = fixture.add_dataset("b", 1);
    let locator = fixture.context().locator();

    assert_eq!(locator.find_by_id(ours.id).await?.id, ours.id);
    let err = locator.find_by_id(theirs.id).await.unwrap_err();
    assert!(matches!(err, Error::WrongProduct { ref actual, .. } if actual == "b"));
    assert!(!err.is_retryable());

    let err = locator.find_by_id(DatasetId::generate()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn archived_datasets_are_not_processed() -> Result<()> {
    let fixture = JobFixture::new(&["a"]);
    let mut record = fixture.add_dataset("a", 1);
    record.archived = true;
    fixture.catalog.insert(record.clone())?;

    let err = fixture.context().locator().find_by_id(record.id).await.unwrap_err();
    assert!(matches!(err, Error::Archived { .. }));
    Ok(())
}

#[tokio::test]
async fn bulk_lookup_reports_each_id() -> Result<()> {
    let fixture = JobFixture::new(&["a"]);
    let known = fixture.add_dataset("a", 1);
    let unknown = DatasetId::generate();

    let results: Vec<_> = futures::StreamExt::collect(
        fixture.context().locator().find_bulk(vec![known.id, unknown]),
    )
    .await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, known.id);
    assert!(results[0].1.is_ok());
    assert_eq!(results[1].0, unknown);
    assert!(matches!(results[1].1, Err(Error::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn unprocessed_search_skips_indexed_outputs_and_rejected_datasets() -> Result<()> {
    let fixture = JobFixture::new(&["a"]);
    let records = fixture.add_datasets("a", 4);
    let ctx = fixture.context();
    let locator = ctx.locator();
    let version = ctx.registry().version_major_minor("passthrough");

    // The first dataset's output is already indexed.
    let output = locator.task(records[0].clone()).identity(&version)?.id;
    fixture.catalog.insert(DatasetRecord::new(output, "a_derived"))?;

    // The second dataset is too cloudy.
    for (i, record) in records.iter().enumerate() {
        let cover = if i == 1 { 80 } else { 10 };
        let mut record = record.clone();
        record.properties.insert("eo:cloud_cover".into(), cover.into());
        fixture.catalog.insert(record)?;
    }

    let predicate: DatasetPredicate = "properties.eo:cloud_cover < 50".parse()?;
    let found: Vec<DatasetId> = locator
        .find_unprocessed(&SearchFilter::new(), None, &version, Some(predicate))
        .map_ok(|r| r.id)
        .try_collect()
        .await?;
    assert_eq!(found, [records[2].id, records[3].id]);

    let limited: Vec<DatasetRecord> = locator
        .find_unprocessed(&SearchFilter::new(), Some(1), &version, None)
        .try_collect()
        .await?;
    assert_eq!(limited.len(), 1);
    Ok(())
}

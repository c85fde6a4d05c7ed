//! End-to-end task execution against in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;

use eoforge_core::{CannedAcl, DatasetId, ObjectUrl, StorageBackend};
use eoforge_flow::catalog::{DatasetRecord, SearchFilter};
use eoforge_flow::error::{Error, Result};
use eoforge_flow::raster::{Band, BandData, DType, Measurement, RasterDataset};
use eoforge_flow::transform::{Transform, TransformRegistry};
use eoforge_test_utils::{JobFixture, StorageOp};
use ndarray::ArrayD;

const PRODUCT: &str = "ga_ls8c_ard_3";

#[tokio::test]
async fn run_one_writes_a_complete_package() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT]).with_output_yaml("  write_stac: true\n");
    let dataset = fixture.add_dataset(PRODUCT, 1);

    let outcome = fixture.runner().run_one(dataset.id, false).await?;
    assert_eq!(outcome.source, dataset.id);

    let files = fixture.output_files();
    let names: Vec<String> = files
        .iter()
        .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
        .collect();
    assert!(names.iter().any(|n| n.ends_with(".odc-metadata.yaml")));
    assert!(names.iter().any(|n| n.ends_with(".stac-item.json")));
    assert!(names.iter().any(|n| n.ends_with(".sha256")));
    assert!(names.iter().any(|n| n.ends_with("_red.tif")));
    assert!(names.iter().any(|n| n.ends_with("_nir.tif")));

    let metadata = outcome.published.metadata.as_local().expect("local output");
    let document = std::fs::read_to_string(metadata)?;
    assert!(document.contains(&outcome.output.to_string()));
    assert!(document.contains(&dataset.id.to_string()));
    Ok(())
}

#[tokio::test]
async fn rerunning_a_task_replaces_rather_than_duplicates() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT]);
    let dataset = fixture.add_dataset(PRODUCT, 1);
    let runner = fixture.runner();

    let first = runner.run_one(dataset.id, false).await?;
    let files_after_first = fixture.output_files();
    let second = runner.run_one(dataset.id, false).await?;

    assert_eq!(first.output, second.output);
    assert_eq!(fixture.output_files(), files_after_first);
    Ok(())
}

#[tokio::test]
async fn remote_publishing_is_idempotent() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT]).with_location("s3://bucket/derived");
    let dataset = fixture.add_dataset(PRODUCT, 1);
    let runner = fixture.runner();

    let first = runner.run_one(dataset.id, false).await?;
    assert!(first.published.transferred > 0);
    let uploads = fixture.storage.put_count();
    assert!(fixture.storage.operations().iter().all(|op| match op {
        StorageOp::Put { acl, .. } => *acl == Some(CannedAcl::BucketOwnerFullControl),
        _ => true,
    }));

    // Band files are byte-identical; only documents carrying the processing
    // time may change.
    let second = runner.run_one(dataset.id, false).await?;
    assert_eq!(second.output, first.output);
    assert!(second.published.unchanged >= 2);
    assert_eq!(
        second.published.transferred + second.published.unchanged,
        first.published.transferred
    );
    assert_eq!(fixture.storage.put_count(), uploads + second.published.transferred);

    let listed = fixture
        .storage
        .list(&ObjectUrl::new("bucket", "derived"))
        .await?;
    assert_eq!(listed.len(), first.published.transferred);
    Ok(())
}

#[tokio::test]
async fn dry_run_leaves_no_trace() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT])
        .with_location("s3://bucket/derived")
        .with_topic("arn:aws:sns:ap-southeast-2:000000000000:outputs");
    let dataset = fixture.add_dataset(PRODUCT, 1);

    let outcome = fixture.runner().run_one(dataset.id, true).await?;
    assert!(!outcome.published.relocated);
    assert!(!outcome.published.notified);
    assert_eq!(fixture.storage.put_count(), 0);
    assert!(fixture.notifier.sent()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn dry_run_predicts_the_real_output() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT]);
    let dataset = fixture.add_dataset(PRODUCT, 1);
    let runner = fixture.runner();

    let dry = runner.run_one(dataset.id, true).await?;
    assert!(fixture.output_files().is_empty());
    let real = runner.run_one(dataset.id, false).await?;
    assert_eq!(dry.output, real.output);
    assert_eq!(dry.published.metadata, real.published.metadata);
    assert!(!fixture.output_files().is_empty());
    Ok(())
}

#[tokio::test]
async fn published_outputs_are_announced() -> Result<()> {
    let topic = "arn:aws:sns:ap-southeast-2:000000000000:outputs";
    let fixture = JobFixture::new(&[PRODUCT]).with_topic(topic);
    let dataset = fixture.add_dataset(PRODUCT, 1);

    let outcome = fixture.runner().run_one(dataset.id, false).await?;
    assert!(outcome.published.notified);
    let sent = fixture.notifier.sent()?;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, topic);
    assert!(sent[0].message.contains(&outcome.output.to_string()));
    Ok(())
}

#[tokio::test]
async fn run_many_isolates_failures() -> Result<()> {
    let fixture = JobFixture::new(&[PRODUCT]).with_concurrency(3);
    fixture.add_datasets(PRODUCT, 3);
    // Registered in the catalog but with no pixels to read.
    let broken = DatasetRecord::new(DatasetId::generate(), PRODUCT);
    fixture.catalog.insert(broken)?;

    let report = fixture
        .runner()
        .run_many(&SearchFilter::new(), None, None, false)
        .await?;
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.exit_code(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_transforms_fail_before_reading() {
    let fixture = JobFixture::new(&[PRODUCT]).with_transform("does_not_exist");
    let dataset = fixture.add_dataset(PRODUCT, 1);
    let err = fixture.runner().run_one(dataset.id, false).await.unwrap_err();
    assert!(matches!(err, Error::TransformNotFound { .. }));
    assert!(!err.is_retryable());
    assert!(fixture.output_files().is_empty());
}

struct Int8Mask;

impl Transform for Int8Mask {
    fn measurements(
        &self,
        _inputs: &BTreeMap<String, Measurement>,
    ) -> Result<BTreeMap<String, Measurement>> {
        Ok(BTreeMap::from([("mask".to_string(), Measurement::new("mask", DType::Int8))]))
    }

    fn compute(&self, data: RasterDataset) -> Result<RasterDataset> {
        let shape = data.bands["red"].data.shape().to_vec();
        let mask = Band::new(BandData::Int8(ArrayD::from_elem(shape, 5_i8)));
        Ok(RasterDataset {
            bands: BTreeMap::from([("mask".to_string(), mask)]),
            ..data
        })
    }
}

#[tokio::test]
async fn int8_outputs_are_widened_to_uint8() -> Result<()> {
    let registry = TransformRegistry::with_builtins().with_transform(
        "int8_mask",
        "2.1.0",
        "https://example.com/int8_mask",
        |_| Ok(Box::new(Int8Mask) as Box<dyn Transform>),
    );
    let fixture = JobFixture::new(&[PRODUCT])
        .with_registry(registry)
        .with_transform("int8_mask");
    let dataset = fixture.add_dataset(PRODUCT, 1);
    let ctx = fixture.context();

    let task = ctx.locator().task(dataset.clone());
    let invocation = ctx.invoker().execute(&task, false).await?;
    assert_eq!(invocation.widened, vec!["mask".to_string()]);
    let mask = &invocation.data.bands["mask"];
    assert_eq!(mask.data.dtype(), DType::Uint8);
    assert!(mask.data.values_f64().iter().all(|v| (*v - 5.0).abs() < f64::EPSILON));

    let outcome = eoforge_flow::Runner::new(ctx).run_one(dataset.id, false).await?;
    assert!(outcome.published.metadata.as_local().is_some());
    let proc_info = fixture
        .output_files()
        .into_iter()
        .find(|p| p.to_string_lossy().ends_with(".proc-info.yaml"))
        .expect("proc-info written");
    let proc_info = std::fs::read_to_string(proc_info)?;
    assert!(proc_info.contains("int8_mask"));
    assert!(proc_info.contains("2.1.0"));
    Ok(())
}

#[tokio::test]
async fn transform_version_feeds_the_identity() -> Result<()> {
    let build = |version: &str| {
        TransformRegistry::new().with_transform("passthrough", version, "", |_| {
            Ok(Box::new(eoforge_flow::transform::builtin::Passthrough) as Box<dyn Transform>)
        })
    };
    let fixture = JobFixture::new(&[PRODUCT]);
    let dataset = fixture.add_dataset(PRODUCT, 1);

    let output = |registry: TransformRegistry| {
        let ctx = fixture.context().with_registry(Arc::new(registry));
        let task = ctx.locator().task(dataset.clone());
        task.identity(&ctx.registry().version_major_minor("passthrough"))
            .map(|i| i.id)
    };
    assert_eq!(output(build("1.2.0"))?, output(build("1.2.7"))?);
    assert_ne!(output(build("1.2.0"))?, output(build("1.3.0"))?);
    Ok(())
}

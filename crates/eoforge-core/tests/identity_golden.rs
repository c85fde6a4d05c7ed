//! Golden vectors for output identities.
//!
//! Output ids are persisted in catalogs and object keys, so they must not
//! drift between releases. The expected values were produced independently
//! with `uuid.uuid5(namespace, json.dumps(doc, sort_keys=True,
//! separators=(',', ':')))`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;

use eoforge_core::canonical_json::to_canonical_string;
use eoforge_core::identity::{identity, DATASET_VERSION_TAG};
use eoforge_core::DatasetId;

const A: &str = "5b1b1b2e-8a34-4f3b-9c1f-0c6f3a9d2f10";
const B: &str = "c6a2a9d4-1f1e-4c4e-8f55-3b0f1d7e2a90";

fn id(s: &str) -> DatasetId {
    s.parse().expect("valid id")
}

#[test]
fn single_source_identity_is_pinned() {
    let uuid = identity("ndvi", "1.2", &[id(A)], &BTreeMap::new()).unwrap();
    assert_eq!(uuid.to_string(), "c49ba16e-9ecb-554a-9346-b7390bce5631");
}

#[test]
fn multi_source_identity_is_pinned_regardless_of_order() {
    let forward = identity("ndvi", "1.2", &[id(A), id(B)], &BTreeMap::new()).unwrap();
    let reverse = identity("ndvi", "1.2", &[id(B), id(A)], &BTreeMap::new()).unwrap();
    assert_eq!(forward, reverse);
    assert_eq!(forward.to_string(), "9d186dd2-7dba-5e2c-b48a-2977d5cc2102");
}

#[test]
fn dataset_version_tag_is_pinned() {
    let tags = BTreeMap::from([(DATASET_VERSION_TAG.to_string(), "3.0.0".to_string())]);
    let uuid = identity("passthrough", "", &[id(A)], &tags).unwrap();
    assert_eq!(uuid.to_string(), "f44a24f2-7c14-5784-a67d-91d437b0aea7");
}

#[test]
fn identity_document_layout() {
    let doc = serde_json::json!({
        "tags": {},
        "sources": [A],
        "algorithm_version": "1.2",
        "algorithm": "ndvi",
    });
    assert_eq!(
        to_canonical_string(&doc).unwrap(),
        format!(r#"{{"algorithm":"ndvi","algorithm_version":"1.2","sources":["{A}"],"tags":{{}}}}"#)
    );
}

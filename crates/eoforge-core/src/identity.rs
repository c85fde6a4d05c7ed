//! Deterministic output identities.
//!
//! Re-running the same transform over the same sources must produce the same
//! output dataset id, so reprocessing overwrites rather than duplicates.
//!
//! The id is a UUID v5 in [`IDENTITY_NAMESPACE`] over the canonical JSON of:
//!
//! ```text
//! {"algorithm": ..., "algorithm_version": ..., "sources": [sorted ids], "tags": {sorted}}
//! ```
//!
//! ## Guarantees
//!
//! - **Pure**: no clock, randomness, or environment input
//! - **Order-insensitive**: source ids and tags are sorted before hashing
//! - **Sensitive**: any change to algorithm, version, a source, or a tag
//!   yields a different id

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::canonical_json::to_canonical_bytes;
use crate::error::Result;
use crate::id::DatasetId;

/// Namespace for every identity produced by eoforge.
pub const IDENTITY_NAMESPACE: Uuid = Uuid::from_bytes([
    0x3d, 0x1e, 0x8c, 0x52, 0x74, 0x0b, 0x4f, 0x6a, 0x9b, 0x27, 0x5e, 0xc4, 0x10, 0xa8, 0xd3, 0x61,
]);

/// Tag key carrying the output product's dataset version.
pub const DATASET_VERSION_TAG: &str = "dataset_version";

#[derive(Serialize)]
struct IdentityDocument<'a> {
    algorithm: &'a str,
    algorithm_version: &'a str,
    sources: Vec<String>,
    tags: &'a BTreeMap<String, String>,
}

/// Computes the deterministic id for an output derived from `sources`.
///
/// # Errors
///
/// Returns a serialization error if the identity document cannot be
/// canonicalized. All inputs are strings, so this does not happen in practice.
pub fn identity(
    algorithm: &str,
    algorithm_version: &str,
    sources: &[DatasetId],
    tags: &BTreeMap<String, String>,
) -> Result<Uuid> {
    let mut sorted: Vec<DatasetId> = sources.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let doc = IdentityDocument {
        algorithm,
        algorithm_version,
        sources: sorted.iter().map(ToString::to_string).collect(),
        tags,
    };
    let bytes = to_canonical_bytes(&doc)?;
    Ok(Uuid::new_v5(&IDENTITY_NAMESPACE, &bytes))
}

/// Reduces a package version to `major.minor`.
///
/// `"1.4.2"` becomes `"1.4"`, `"2"` stays `"2"`, and an empty version stays
/// empty.
#[must_use]
pub fn major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> DatasetId {
        DatasetId::from_uuid(Uuid::from_u128(n))
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn same_inputs_same_identity() {
        let t = tags(&[("dataset_version", "3.0.0")]);
        let a = identity("ndvi", "1.2", &[id(1)], &t).expect("identity");
        let b = identity("ndvi", "1.2", &[id(1)], &t).expect("identity");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn source_order_is_irrelevant() {
        let t = BTreeMap::new();
        let a = identity("wofs", "2.0", &[id(1), id(2), id(3)], &t).expect("identity");
        let b = identity("wofs", "2.0", &[id(3), id(1), id(2)], &t).expect("identity");
        assert_eq!(a, b);
    }

    #[test]
    fn every_input_changes_identity() {
        let t = tags(&[("dataset_version", "3.0.0")]);
        let base = identity("ndvi", "1.2", &[id(1)], &t).expect("identity");

        assert_ne!(base, identity("ndwi", "1.2", &[id(1)], &t).expect("identity"));
        assert_ne!(base, identity("ndvi", "1.3", &[id(1)], &t).expect("identity"));
        assert_ne!(base, identity("ndvi", "1.2", &[id(2)], &t).expect("identity"));
        assert_ne!(
            base,
            identity("ndvi", "1.2", &[id(1)], &tags(&[("dataset_version", "3.0.1")]))
                .expect("identity")
        );
        assert_ne!(
            base,
            identity("ndvi", "1.2", &[id(1)], &BTreeMap::new()).expect("identity")
        );
    }

    #[test]
    fn major_minor_truncates() {
        assert_eq!(major_minor("1.4.2"), "1.4");
        assert_eq!(major_minor("1.4"), "1.4");
        assert_eq!(major_minor("2"), "2");
        assert_eq!(major_minor(""), "");
        assert_eq!(major_minor("0.10.3rc1"), "0.10");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn identity_is_deterministic_under_permutation(
                raw in proptest::collection::vec(any::<u128>(), 1..6),
                version in "[0-9]{1,2}\\.[0-9]{1,2}",
                tag_values in proptest::collection::btree_map("[a-z_]{1,10}", "[a-zA-Z0-9.]{0,10}", 0..4),
            ) {
                let forward: Vec<DatasetId> = raw.iter().copied().map(id).collect();
                let mut reversed = forward.clone();
                reversed.reverse();

                let a = identity("transform", &version, &forward, &tag_values)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let b = identity("transform", &version, &reversed, &tag_values)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(a, b);
            }
        }
    }
}

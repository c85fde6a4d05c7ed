//! Property-based tests for output identity and queue message invariants.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use eoforge_core::{Configuration, DatasetId};
use eoforge_flow::catalog::DatasetRecord;
use eoforge_flow::dispatch::QueueMessage;
use eoforge_flow::Task;
use eoforge_test_utils::config_yaml;

fn arb_dataset_id() -> impl Strategy<Value = DatasetId> {
    any::<[u8; 16]>().prop_map(|bytes| DatasetId::from_uuid(Uuid::from_bytes(bytes)))
}

fn arb_transform() -> impl Strategy<Value = String> {
    "t_[a-z0-9_]{2,20}"
}

fn arb_version() -> impl Strategy<Value = String> {
    (0u8..10, 0u8..20).prop_map(|(major, minor)| format!("{major}.{minor}"))
}

fn task(id: DatasetId, transform: &str, location: &str, dataset_version: Option<&str>) -> Task {
    let extra = dataset_version
        .map(|v| format!("  metadata:\n    dataset_version: \"{v}\"\n"))
        .unwrap_or_default();
    let config = Configuration::from_yaml_str(&config_yaml(&["p"], transform, location, &extra))
        .expect("configuration");
    Task::new(Arc::new(DatasetRecord::new(id, "p")), Arc::new(config))
}

proptest! {
    #[test]
    fn identity_is_a_pure_function_of_its_inputs(
        id in arb_dataset_id(),
        transform in arb_transform(),
        version in arb_version(),
    ) {
        let a = task(id, &transform, "/tmp/a", None).identity(&version).unwrap();
        let b = task(id, &transform, "/somewhere/else", None).identity(&version).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn identity_distinguishes_sources(
        a in arb_dataset_id(),
        b in arb_dataset_id(),
        transform in arb_transform(),
    ) {
        prop_assume!(a != b);
        let ia = task(a, &transform, "/out", None).identity("1.0").unwrap().id;
        let ib = task(b, &transform, "/out", None).identity("1.0").unwrap().id;
        prop_assert_ne!(ia, ib);
    }

    #[test]
    fn identity_tracks_algorithm_version(
        id in arb_dataset_id(),
        transform in arb_transform(),
        v1 in arb_version(),
        v2 in arb_version(),
    ) {
        prop_assume!(v1 != v2);
        let t = task(id, &transform, "/out", None);
        prop_assert_ne!(t.identity(&v1).unwrap().id, t.identity(&v2).unwrap().id);
    }

    #[test]
    fn dataset_version_is_folded_into_the_identity(
        id in arb_dataset_id(),
        version in arb_version(),
    ) {
        let plain = task(id, "passthrough", "/out", None).identity("1.0").unwrap();
        let versioned = task(id, "passthrough", "/out", Some(&version)).identity("1.0").unwrap();
        prop_assert_ne!(plain.id, versioned.id);
        let values = versioned.values();
        prop_assert_eq!(values.get("dataset_version"), Some(&version));
    }

    #[test]
    fn reference_messages_decode_to_what_was_encoded(
        id in arb_dataset_id(),
        transform in arb_transform(),
    ) {
        let message = QueueMessage::reference(id, transform.clone());
        let decoded = QueueMessage::decode(&message.encode().unwrap()).unwrap();
        prop_assert_eq!(decoded.transform(), transform.as_str());
        prop_assert_eq!(decoded, message);
    }
}

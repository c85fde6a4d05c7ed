//! Converting catalog records into the properties an output inherits.
//!
//! Current-layout records carry STAC-style properties already. The legacy
//! layouts keep some of them elsewhere (a top-level region code, a tile id),
//! so the region code goes through a fallback chain:
//!
//! 1. the `odc:region_code` property
//! 2. the record's `region_code` field
//! 3. a path/row or MGRS tile parsed out of the tile id

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::catalog::{DatasetRecord, MetadataType};

static LANDSAT_SCENE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^L[COTEM]\d(\d{3})(\d{3})\d{7}").expect("valid regex")
});

static LANDSAT_PRODUCT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^L[COTEM]\d{2}_[A-Z0-9]{4}_(\d{3})(\d{3})_").expect("valid regex")
});

static SENTINEL2_GRANULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_T(\d{2}[A-Z]{3})_").expect("valid regex")
});

static SENTINEL2_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^S2[AB]_(\d{2}[A-Z]{3})_").expect("valid regex")
});

/// Property prefixes copied from a source onto its derivative.
const INHERITED_PREFIXES: &[&str] = &["eo:", "landsat:", "sentinel:", "gqa:", "fmask:"];

/// Individual properties copied from a source onto its derivative.
const INHERITED_KEYS: &[&str] = &["datetime", "odc:region_code", "dea:dataset_maturity"];

/// Region code parsed from a Landsat or Sentinel-2 identifier.
///
/// Landsat identifiers give `PPPRRR` (path then row), Sentinel-2 granule and
/// item identifiers give the MGRS tile (`55HBU`).
#[must_use]
pub fn region_code_from_tile_id(tile_id: &str) -> Option<String> {
    for re in [&*LANDSAT_SCENE_ID, &*LANDSAT_PRODUCT_ID] {
        if let Some(caps) = re.captures(tile_id) {
            return Some(format!("{}{}", &caps[1], &caps[2]));
        }
    }
    [&*SENTINEL2_GRANULE, &*SENTINEL2_ITEM]
        .into_iter()
        .find_map(|re| re.captures(tile_id))
        .map(|caps| caps[1].to_string())
}

/// Resolves a record's region code through the fallback chain.
#[must_use]
pub fn region_code(record: &DatasetRecord) -> Option<String> {
    if let Some(code) = record.property_str("odc:region_code") {
        return Some(code.to_string());
    }
    if let Some(code) = &record.region_code {
        return Some(code.clone());
    }
    let candidates = [
        record.tile_id.as_deref(),
        record.property_str("landsat:landsat_product_id"),
        record.property_str("landsat:landsat_scene_id"),
        record.property_str("sentinel:sentinel_tile_id"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(region_code_from_tile_id)
}

/// Properties of a source record in the current layout.
///
/// Legacy records are rewritten: the region code is resolved, and the
/// acquisition time, platform and instrument are filled in from the record.
#[must_use]
pub fn source_properties(record: &DatasetRecord) -> BTreeMap<String, Value> {
    let mut properties = record.properties.clone();
    if let Some(datetime) = record.datetime {
        properties
            .entry("datetime".into())
            .or_insert_with(|| Value::from(datetime.to_rfc3339()));
    }
    match record.metadata_type {
        MetadataType::Eo3 => {}
        MetadataType::Eo | MetadataType::EoPlus => {
            if let Some(code) = region_code(record) {
                properties.insert("odc:region_code".into(), Value::from(code));
            }
            if record.metadata_type == MetadataType::EoPlus {
                let tile = record.tile_id.clone().unwrap_or_default();
                let key = if record.platform().is_some_and(|p| p.starts_with("sentinel")) {
                    "sentinel:sentinel_tile_id"
                } else {
                    "landsat:landsat_scene_id"
                };
                if !tile.is_empty() {
                    properties.entry(key.into()).or_insert_with(|| Value::from(tile));
                }
            }
        }
    }
    properties
}

/// Whether a source property is copied onto derivatives.
#[must_use]
pub fn is_inherited(key: &str) -> bool {
    INHERITED_KEYS.contains(&key) || INHERITED_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Lineage classifier for a source product: the family part of names such
/// as `ga_ls8c_ard_3`.
#[must_use]
pub fn product_family(product: &str) -> Option<&str> {
    let parts: Vec<&str> = product.split('_').collect();
    match parts.as_slice() {
        [_, _, family, _] => Some(family),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoforge_core::DatasetId;

    fn record() -> DatasetRecord {
        DatasetRecord::new(DatasetId::generate(), "ga_ls8c_ard_3")
    }

    #[test]
    fn landsat_identifiers() {
        assert_eq!(
            region_code_from_tile_id("LC80900842020138LGN00").as_deref(),
            Some("090084")
        );
        assert_eq!(
            region_code_from_tile_id("LC08_L1TP_090084_20200517_20200527_01_T1").as_deref(),
            Some("090084")
        );
        assert_eq!(
            region_code_from_tile_id("LE07_L1TP_112080_20030101_20170101_01_T1").as_deref(),
            Some("112080")
        );
    }

    #[test]
    fn sentinel_identifiers() {
        assert_eq!(
            region_code_from_tile_id(
                "S2A_OPER_MSI_L1C_TL_EPAE_20200517T005011_A025543_T55HBU_N02.09"
            )
            .as_deref(),
            Some("55HBU")
        );
        assert_eq!(
            region_code_from_tile_id("S2B_55HBU_20200517_0_L2A").as_deref(),
            Some("55HBU")
        );
        assert_eq!(region_code_from_tile_id("not-a-tile"), None);
    }

    #[test]
    fn fallback_chain_order() {
        let mut r = record();
        r.tile_id = Some("LC80900842020138LGN00".into());
        assert_eq!(region_code(&r).as_deref(), Some("090084"));

        r.region_code = Some("091084".into());
        assert_eq!(region_code(&r).as_deref(), Some("091084"));

        let r = r.with_property("odc:region_code", "092084");
        assert_eq!(region_code(&r).as_deref(), Some("092084"));
    }

    #[test]
    fn legacy_records_are_rewritten() {
        let mut r = record().with_property("eo:platform", "landsat-8");
        r.metadata_type = MetadataType::EoPlus;
        r.tile_id = Some("LC80900842020138LGN00".into());
        r.datetime = Some(chrono::DateTime::UNIX_EPOCH);

        let props = source_properties(&r);
        assert_eq!(props["odc:region_code"], "090084");
        assert_eq!(props["landsat:landsat_scene_id"], "LC80900842020138LGN00");
        assert_eq!(props["datetime"], "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn current_records_keep_their_properties() {
        let mut r = record().with_property("odc:region_code", "x");
        r.region_code = Some("y".into());
        assert_eq!(source_properties(&r)["odc:region_code"], "x");
    }

    #[test]
    fn inheritance_and_families() {
        assert!(is_inherited("eo:cloud_cover"));
        assert!(is_inherited("datetime"));
        assert!(!is_inherited("odc:product"));
        assert_eq!(product_family("ga_ls8c_ard_3"), Some("ard"));
        assert_eq!(product_family("usgs_ls8"), None);
    }
}

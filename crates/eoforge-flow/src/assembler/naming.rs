//! Output naming conventions.
//!
//! Product names, package folders and file prefixes are all derived from the
//! output's properties, so they must be set before any file is written.
//!
//! | Convention | Folder | Prefix |
//! |---|---|---|
//! | `dea` | `{product}/{version}/{region}/{yyyy}/{mm}/{dd}` | `{product}_{region}_{date}` |
//! | `dea_s2` | `{product}/{version}/{zone}/{square}/{yyyy}/{mm}/{dd}` | `{product}_{region}_{date}_{maturity}` |
//! | `dea_c3` | `{product}/{version}/{path}/{row}/{yyyy}/{mm}/{dd}` | `{product}_{region}_{date}_{maturity}` |
//!
//! `version` is `odc:dataset_version` with dots replaced by dashes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

/// Family used when none is configured.
pub const DEFAULT_FAMILY: &str = "derived";

/// How output products, folders and files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NamingConventions {
    /// Flat region folder.
    #[default]
    Dea,
    /// Sentinel-2 MGRS tile split into zone and square.
    DeaS2,
    /// Collection 3 layout with the region split in two.
    DeaC3,
}

impl NamingConventions {
    /// Picks the convention for an output.
    ///
    /// An explicit `dea_c3` request wins; Sentinel platforms get `dea_s2`;
    /// everything else is `dea`.
    #[must_use]
    pub fn select(requested: Option<&str>, platform: Option<&str>) -> Self {
        if requested == Some("dea_c3") {
            Self::DeaC3
        } else if platform.is_some_and(|p| p.to_ascii_lowercase().starts_with("sentinel")) {
            Self::DeaS2
        } else {
            Self::Dea
        }
    }

    /// Returns the convention name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dea => "dea",
            Self::DeaS2 => "dea_s2",
            Self::DeaC3 => "dea_c3",
        }
    }

    /// Derives every name for an output from its properties.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Publish`] if `datetime` is missing or unparseable.
    pub fn names(self, properties: &BTreeMap<String, Value>) -> Result<Names> {
        let prop = |key: &str| properties.get(key).and_then(Value::as_str);

        let datetime = prop("datetime")
            .ok_or_else(|| Error::publish("output has no datetime property"))?;
        let datetime = DateTime::parse_from_rfc3339(datetime)
            .map_err(|e| Error::publish(format!("invalid datetime '{datetime}': {e}")))?
            .with_timezone(&Utc);

        let product = prop("odc:product")
            .map_or_else(|| self.product_name(properties), str::to_string);
        let version = prop("odc:dataset_version").unwrap_or("0.0.0").replace('.', "-");
        let region = prop("odc:region_code");

        let mut folder = vec![product.clone(), version];
        if let Some(region) = region {
            match self {
                Self::Dea => folder.push(region.to_string()),
                Self::DeaS2 | Self::DeaC3 => {
                    let (a, b) = split_region(region);
                    folder.extend([a, b].into_iter().filter(|s| !s.is_empty()).map(str::to_string));
                }
            }
        }
        folder.push(format!("{:04}", datetime.year()));
        folder.push(format!("{:02}", datetime.month()));
        folder.push(format!("{:02}", datetime.day()));

        let mut prefix = vec![product.clone()];
        prefix.extend(region.map(str::to_string));
        prefix.push(datetime.format("%Y-%m-%d").to_string());
        if self != Self::Dea {
            prefix.push(prop("dea:dataset_maturity").unwrap_or("final").to_string());
        }

        Ok(Names {
            product,
            folder: folder.join("/"),
            prefix: prefix.join("_"),
        })
    }

    /// `{organisation}_{platform}{instrument}_{family}_{collection}`, skipping
    /// parts that are unknown.
    fn product_name(self, properties: &BTreeMap<String, Value>) -> String {
        let prop = |key: &str| properties.get(key).and_then(Value::as_str);

        let organisation = prop("odc:producer").and_then(|p| p.split('.').next());
        let sensor = prop("eo:platform").map(|platform| {
            let instrument = instrument_abbreviation(
                platform,
                prop("eo:instrument"),
                prop("landsat:landsat_scene_id"),
            );
            format!("{}{instrument}", platform_abbreviation(platform))
        });
        let family = prop("odc:product_family").unwrap_or(DEFAULT_FAMILY);
        let collection = properties
            .get("odc:collection_number")
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
            .or_else(|| (self == Self::DeaC3).then(|| "3".to_string()));

        [organisation.map(str::to_string), sensor, Some(family.to_string()), collection]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for NamingConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names derived for one output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Names {
    /// Product name.
    pub product: String,
    /// Package folder relative to the output location.
    pub folder: String,
    /// Prefix shared by every file in the package.
    pub prefix: String,
}

/// `landsat-8` → `ls8`, `sentinel-2a` → `s2a`; several platforms of one
/// family collapse to the family (`ls`, `s2`).
fn platform_abbreviation(platforms: &str) -> String {
    let abbreviations: Vec<String> = platforms
        .split(',')
        .map(|p| {
            let p = p.trim().to_ascii_lowercase();
            if let Some(n) = p.strip_prefix("landsat-") {
                format!("ls{n}")
            } else if let Some(n) = p.strip_prefix("sentinel-") {
                format!("s{n}")
            } else {
                p.chars().filter(char::is_ascii_alphanumeric).take(3).collect()
            }
        })
        .collect();
    match abbreviations.as_slice() {
        [single] => single.clone(),
        [first, ..] => first.chars().take(2).collect(),
        [] => String::new(),
    }
}

fn instrument_abbreviation(
    platform: &str,
    instrument: Option<&str>,
    scene_id: Option<&str>,
) -> String {
    let platform = platform.to_ascii_lowercase();
    if platform.starts_with("landsat") {
        if let Some(c) = scene_id.and_then(|id| id.chars().nth(1)) {
            return c.to_ascii_lowercase().to_string();
        }
        return match instrument.map(str::to_ascii_uppercase).as_deref() {
            Some("OLI_TIRS" | "OLI") => "c",
            Some("ETM" | "ETM+") => "e",
            Some("TM") => "t",
            Some("MSS") => "m",
            _ => "",
        }
        .to_string();
    }
    if platform.starts_with("sentinel") {
        return "m".to_string();
    }
    String::new()
}

/// `090084` → (`090`, `084`); `55HBU` → (`55`, `HBU`).
fn split_region(region: &str) -> (&str, &str) {
    let at = if region.len() == 6 && region.bytes().all(|b| b.is_ascii_digit()) {
        3
    } else {
        region
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(region.len())
    };
    region.split_at(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
            .collect()
    }

    fn landsat() -> BTreeMap<String, Value> {
        props(&[
            ("datetime", "2020-05-17T00:00:00Z"),
            ("eo:platform", "landsat-8"),
            ("eo:instrument", "OLI_TIRS"),
            ("odc:producer", "ga.gov.au"),
            ("odc:product_family", "ndvi"),
            ("odc:dataset_version", "1.0.0"),
            ("odc:region_code", "090084"),
        ])
    }

    #[test]
    fn selection() {
        assert_eq!(NamingConventions::select(None, Some("landsat-8")), NamingConventions::Dea);
        assert_eq!(
            NamingConventions::select(None, Some("sentinel-2a")),
            NamingConventions::DeaS2
        );
        assert_eq!(
            NamingConventions::select(Some("dea_c3"), Some("sentinel-2a")),
            NamingConventions::DeaC3
        );
    }

    #[test]
    fn dea_names() {
        let names = NamingConventions::Dea.names(&landsat()).expect("names");
        assert_eq!(names.product, "ga_ls8c_ndvi");
        assert_eq!(names.folder, "ga_ls8c_ndvi/1-0-0/090084/2020/05/17");
        assert_eq!(names.prefix, "ga_ls8c_ndvi_090084_2020-05-17");
    }

    #[test]
    fn c3_names_split_path_row() {
        let names = NamingConventions::DeaC3.names(&landsat()).expect("names");
        assert_eq!(names.product, "ga_ls8c_ndvi_3");
        assert_eq!(names.folder, "ga_ls8c_ndvi_3/1-0-0/090/084/2020/05/17");
        assert_eq!(names.prefix, "ga_ls8c_ndvi_3_090084_2020-05-17_final");
    }

    #[test]
    fn s2_names_split_mgrs_tile() {
        let mut p = props(&[
            ("datetime", "2021-01-02T03:04:05+00:00"),
            ("eo:platform", "sentinel-2b"),
            ("odc:region_code", "55HBU"),
            ("dea:dataset_maturity", "interim"),
            ("odc:collection_number", "3"),
        ]);
        p.insert("odc:product".into(), Value::from("ga_s2_wo_3"));
        let names = NamingConventions::DeaS2.names(&p).expect("names");
        assert_eq!(names.folder, "ga_s2_wo_3/0-0-0/55/HBU/2021/01/02");
        assert_eq!(names.prefix, "ga_s2_wo_3_55HBU_2021-01-02_interim");

        p.remove("odc:product");
        assert_eq!(NamingConventions::DeaS2.names(&p).expect("names").product, "s2bm_derived_3");
    }

    #[test]
    fn missing_datetime_is_a_publish_error() {
        let err = NamingConventions::Dea.names(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Publish { .. }));
    }

    #[test]
    fn abbreviations() {
        assert_eq!(platform_abbreviation("landsat-5,landsat-7"), "ls");
        assert_eq!(platform_abbreviation("sentinel-2a"), "s2a");
        assert_eq!(instrument_abbreviation("landsat-7", None, Some("LE71120802003001ASA00")), "e");
        assert_eq!(split_region("55HBU"), ("55", "HBU"));
        assert_eq!(split_region("x"), ("", "x"));
    }
}

//! Search filters and dataset predicates.
//!
//! Filters come from `key=value` expressions on the command line:
//!
//! - `time=2020-01-01/2020-06-30` (or a single `2020`, `2020-05`, `2020-05-17`)
//! - `bbox=west,south,east,north`
//! - anything else is a property equality, e.g. `eo:platform=landsat-8`
//!
//! A [`DatasetPredicate`] is a single comparison such as
//! `properties.gqa:iterative_mean_xy <= 1`, evaluated against a record after
//! the search.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use super::DatasetRecord;
use crate::error::{Error, Result};

/// Inclusive acquisition time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest acquisition time, if bounded.
    pub start: Option<DateTime<Utc>>,
    /// Latest acquisition time, if bounded.
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Whether `t` falls inside the range.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| t >= s) && self.end.is_none_or(|e| t <= e)
    }

    /// Formats the range as an RFC 3339 interval (`start/end`, `..` when open).
    #[must_use]
    pub fn to_interval(&self) -> String {
        let fmt = |t: Option<DateTime<Utc>>| {
            t.map_or_else(|| "..".to_string(), |t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        };
        format!("{}/{}", fmt(self.start), fmt(self.end))
    }
}

/// Dataset search criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Acquisition time range.
    pub time: Option<TimeRange>,
    /// Bounding box `[west, south, east, north]` in degrees.
    pub bbox: Option<[f64; 4]>,
    /// Properties that must be equal.
    pub properties: BTreeMap<String, Value>,
}

impl SearchFilter {
    /// Creates a filter that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` expressions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for malformed expressions, dates or
    /// bounding boxes.
    pub fn parse_expressions<S: AsRef<str>>(expressions: &[S]) -> Result<Self> {
        let mut filter = Self::default();
        for expr in expressions {
            let expr = expr.as_ref();
            let (key, value) = expr
                .split_once('=')
                .ok_or_else(|| Error::configuration(format!("expected key=value, got '{expr}'")))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "time" => filter.time = Some(parse_time_range(value)?),
                "bbox" => filter.bbox = Some(parse_bbox(value)?),
                _ => {
                    filter.properties.insert(key.to_string(), parse_literal(value));
                }
            }
        }
        Ok(filter)
    }

    /// Restricts the time range.
    #[must_use]
    pub const fn with_time(mut self, time: TimeRange) -> Self {
        self.time = Some(time);
        self
    }

    /// Requires a property value.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether a record satisfies every criterion.
    #[must_use]
    pub fn matches(&self, record: &DatasetRecord) -> bool {
        if let Some(range) = &self.time {
            match record.datetime {
                Some(t) if range.contains(t) => {}
                _ => return false,
            }
        }
        if let Some(bbox) = &self.bbox {
            match record.geometry.as_ref().and_then(geometry_bounds) {
                Some(bounds) if intersects(bbox, &bounds) => {}
                _ => return false,
            }
        }
        self.properties
            .iter()
            .all(|(k, v)| record.properties.get(k).is_some_and(|actual| loosely_equal(actual, v)))
    }
}

fn parse_literal(value: &str) -> Value {
    match serde_json::from_str::<Value>(value) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(value.trim_matches('"').to_string()),
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::String(a), other) | (other, Value::String(a)) => *a == other.to_string(),
        (a, b) => a == b,
    }
}

fn parse_bbox(value: &str) -> Result<[f64; 4]> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::configuration(format!("invalid bbox '{value}': {e}")))?;
    let bbox: [f64; 4] = parts
        .try_into()
        .map_err(|_| Error::configuration(format!("bbox needs 4 numbers, got '{value}'")))?;
    if bbox[0] > bbox[2] || bbox[1] > bbox[3] {
        return Err(Error::configuration(format!(
            "bbox must be west,south,east,north, got '{value}'"
        )));
    }
    Ok(bbox)
}

/// Parses `a/b`, `a/..`, `../b` or a single period.
///
/// # Errors
///
/// Returns [`Error::Configuration`] for unparseable dates.
pub fn parse_time_range(value: &str) -> Result<TimeRange> {
    let (start, end) = match value.split_once('/') {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (value.trim(), value.trim()),
    };
    let start = match start {
        ".." | "" => None,
        s => Some(parse_period(s)?.0),
    };
    let end = match end {
        ".." | "" => None,
        s => Some(parse_period(s)?.1),
    };
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(Error::configuration(format!(
                "time range '{value}' ends before it starts"
            )));
        }
    }
    Ok(TimeRange { start, end })
}

/// Returns the first and last instant of a year, month, day or timestamp.
fn parse_period(s: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let bad = || Error::configuration(format!("invalid date '{s}'"));

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        let t = t.with_timezone(&Utc);
        return Ok((t, t));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let next = d.succ_opt().ok_or_else(bad)?;
        return Ok((start_of(d), start_of(next) - Duration::milliseconds(1)));
    }
    let parts: Vec<&str> = s.split('-').collect();
    match parts.as_slice() {
        [year, month] => {
            let year: i32 = year.parse().map_err(|_| bad())?;
            let month: u32 = month.parse().map_err(|_| bad())?;
            let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(bad)?;
            let next = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)
            }
            .ok_or_else(bad)?;
            Ok((start_of(first), start_of(next) - Duration::milliseconds(1)))
        }
        [year] => {
            let year: i32 = year.parse().map_err(|_| bad())?;
            let first = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(bad)?;
            let next = NaiveDate::from_ymd_opt(first.year() + 1, 1, 1).ok_or_else(bad)?;
            Ok((start_of(first), start_of(next) - Duration::milliseconds(1)))
        }
        _ => Err(bad()),
    }
}

fn start_of(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Bounding box of every coordinate pair in a GeoJSON geometry.
#[must_use]
pub fn geometry_bounds(geometry: &Value) -> Option<[f64; 4]> {
    fn walk(v: &Value, acc: &mut Option<[f64; 4]>) {
        let Value::Array(items) = v else { return };
        if let [Value::Number(x), Value::Number(y), ..] = items.as_slice() {
            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                let b = acc.get_or_insert([x, y, x, y]);
                b[0] = b[0].min(x);
                b[1] = b[1].min(y);
                b[2] = b[2].max(x);
                b[3] = b[3].max(y);
                return;
            }
        }
        for item in items {
            walk(item, acc);
        }
    }

    let mut acc = None;
    walk(geometry.get("coordinates")?, &mut acc);
    acc
}

fn intersects(a: &[f64; 4], b: &[f64; 4]) -> bool {
    a[0] <= b[2] && b[0] <= a[2] && a[1] <= b[3] && b[1] <= a[3]
}

/// Comparison operator of a [`DatasetPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Comparison {
    const TOKENS: [(&'static str, Self); 6] = [
        ("<=", Self::Le),
        (">=", Self::Ge),
        ("==", Self::Eq),
        ("!=", Self::Ne),
        ("<", Self::Lt),
        (">", Self::Gt),
    ];

    const fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ord, Ordering::Equal),
            Self::Ne => !matches!(ord, Ordering::Equal),
            Self::Lt => matches!(ord, Ordering::Less),
            Self::Le => !matches!(ord, Ordering::Greater),
            Self::Gt => matches!(ord, Ordering::Greater),
            Self::Ge => !matches!(ord, Ordering::Less),
        }
    }
}

/// A single comparison against a record field, e.g.
/// `properties.eo:cloud_cover < 20`.
///
/// The left side is a dotted path into the record's JSON form. Records where
/// the path does not resolve never match.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetPredicate {
    path: String,
    op: Comparison,
    literal: Value,
}

impl DatasetPredicate {
    /// Evaluates the predicate.
    #[must_use]
    pub fn matches(&self, record: &DatasetRecord) -> bool {
        let Ok(doc) = serde_json::to_value(record) else {
            return false;
        };
        let Ok(actual) = eoforge_core::loader::lookup(&doc, &self.path) else {
            return false;
        };
        let ord = match (actual, &self.literal) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ord.is_some_and(|ord| self.op.accepts(ord))
    }
}

impl FromStr for DatasetPredicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let found = s.char_indices().find_map(|(i, _)| {
            Comparison::TOKENS
                .iter()
                .find(|(token, _)| s[i..].starts_with(token))
                .map(|(token, op)| (i, *token, *op))
        });
        let (index, token, op) =
            found.ok_or_else(|| Error::configuration(format!("predicate '{s}' has no comparison")))?;
        let path = s[..index].trim();
        let literal = s[index + token.len()..].trim();
        if path.is_empty() || literal.is_empty() {
            return Err(Error::configuration(format!("incomplete predicate '{s}'")));
        }
        Ok(Self {
            path: path.to_string(),
            op,
            literal: parse_literal(literal),
        })
    }
}

impl fmt::Display for DatasetPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = Comparison::TOKENS
            .iter()
            .find(|(_, op)| *op == self.op)
            .map_or("?", |(t, _)| *t);
        write!(f, "{} {token} {}", self.path, self.literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoforge_core::DatasetId;
    use serde_json::json;

    fn record() -> DatasetRecord {
        let mut r = DatasetRecord::new(DatasetId::generate(), "ga_ls8c_ard_3")
            .with_property("eo:platform", "landsat-8")
            .with_property("eo:cloud_cover", 12.5)
            .with_datetime(Utc.with_ymd_and_hms(2020, 5, 17, 0, 12, 0).unwrap());
        r.geometry = Some(json!({
            "type": "Polygon",
            "coordinates": [[[148.0, -35.0], [149.0, -35.0], [149.0, -36.0], [148.0, -36.0], [148.0, -35.0]]]
        }));
        r
    }

    #[test]
    fn parses_all_expression_kinds() {
        let filter = SearchFilter::parse_expressions(&[
            "time=2020-01/2020-06",
            "bbox=147,-37,150,-34",
            "eo:platform=landsat-8",
        ])
        .expect("parse");
        assert!(filter.time.is_some());
        assert_eq!(filter.bbox, Some([147.0, -37.0, 150.0, -34.0]));
        assert!(filter.matches(&record()));
    }

    #[test]
    fn time_period_bounds() {
        let range = parse_time_range("2020-05-17").expect("parse");
        assert!(range.contains(Utc.with_ymd_and_hms(2020, 5, 17, 23, 59, 59).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2020, 5, 18, 0, 0, 0).unwrap()));

        let year = parse_time_range("2019").expect("parse");
        assert!(!year.contains(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()));

        let open = parse_time_range("2020-06/..").expect("parse");
        assert!(open.end.is_none());
        assert!(!open.contains(Utc.with_ymd_and_hms(2020, 5, 31, 0, 0, 0).unwrap()));
    }

    #[test]
    fn rejects_bad_expressions() {
        assert!(SearchFilter::parse_expressions(&["nonsense"]).is_err());
        assert!(SearchFilter::parse_expressions(&["bbox=1,2,3"]).is_err());
        assert!(SearchFilter::parse_expressions(&["time=2020-13"]).is_err());
        assert!(SearchFilter::parse_expressions(&["time=2021/2020"]).is_err());
    }

    #[test]
    fn property_mismatch_and_missing_time_exclude() {
        let filter = SearchFilter::new().with_property("eo:platform", "landsat-9");
        assert!(!filter.matches(&record()));

        let mut undated = record();
        undated.datetime = None;
        let filter = SearchFilter::parse_expressions(&["time=2020"]).expect("parse");
        assert!(!filter.matches(&undated));
    }

    #[test]
    fn numeric_properties_compare_by_value() {
        let filter = SearchFilter::parse_expressions(&["eo:cloud_cover=12.5"]).expect("parse");
        assert!(filter.matches(&record()));
    }

    #[test]
    fn predicate_compares_numbers_and_strings() {
        let p: DatasetPredicate = "properties.eo:cloud_cover <= 20".parse().expect("parse");
        assert!(p.matches(&record()));
        let p: DatasetPredicate = "properties.eo:cloud_cover>20".parse().expect("parse");
        assert!(!p.matches(&record()));
        let p: DatasetPredicate = "product == ga_ls8c_ard_3".parse().expect("parse");
        assert!(p.matches(&record()));
        let p: DatasetPredicate = "properties.missing != 1".parse().expect("parse");
        assert!(!p.matches(&record()));
        assert!("no operator here".parse::<DatasetPredicate>().is_err());
    }

    #[test]
    fn geometry_bounds_walks_nested_rings() {
        let bounds = geometry_bounds(record().geometry.as_ref().unwrap()).expect("bounds");
        assert_eq!(bounds, [148.0, -36.0, 149.0, -35.0]);
    }
}

//! In-memory raster model.
//!
//! A [`RasterDataset`] is a set of named bands on one pixel grid
//! ([`GeoBox`]). Band arrays are dynamic-dimensional: freshly loaded data
//! carries a leading time axis of length one (`[time, y, x]`), which is
//! dropped after compute so outputs are plain `[y, x]` grids.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    Uint8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    Uint16,
    /// Signed 32-bit integer.
    Int32,
    /// Unsigned 32-bit integer.
    Uint32,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl DType {
    /// The numpy-style name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    /// Whether the type is floating point.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed pixel array.
#[derive(Debug, Clone, PartialEq)]
pub enum BandData {
    /// `int8` pixels.
    Int8(ArrayD<i8>),
    /// `uint8` pixels.
    Uint8(ArrayD<u8>),
    /// `int16` pixels.
    Int16(ArrayD<i16>),
    /// `uint16` pixels.
    Uint16(ArrayD<u16>),
    /// `int32` pixels.
    Int32(ArrayD<i32>),
    /// `uint32` pixels.
    Uint32(ArrayD<u32>),
    /// `float32` pixels.
    Float32(ArrayD<f32>),
    /// `float64` pixels.
    Float64(ArrayD<f64>),
}

/// Applies `$body` to the array inside any variant.
macro_rules! with_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            BandData::Int8($arr) => $body,
            BandData::Uint8($arr) => $body,
            BandData::Int16($arr) => $body,
            BandData::Uint16($arr) => $body,
            BandData::Int32($arr) => $body,
            BandData::Uint32($arr) => $body,
            BandData::Float32($arr) => $body,
            BandData::Float64($arr) => $body,
        }
    };
}

/// Applies `$body` and rewraps the result in the same variant.
macro_rules! map_array {
    ($data:expr, $arr:ident => $body:expr) => {
        match $data {
            BandData::Int8($arr) => BandData::Int8($body),
            BandData::Uint8($arr) => BandData::Uint8($body),
            BandData::Int16($arr) => BandData::Int16($body),
            BandData::Uint16($arr) => BandData::Uint16($body),
            BandData::Int32($arr) => BandData::Int32($body),
            BandData::Uint32($arr) => BandData::Uint32($body),
            BandData::Float32($arr) => BandData::Float32($body),
            BandData::Float64($arr) => BandData::Float64($body),
        }
    };
}

impl BandData {
    /// The pixel type.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        match self {
            Self::Int8(_) => DType::Int8,
            Self::Uint8(_) => DType::Uint8,
            Self::Int16(_) => DType::Int16,
            Self::Uint16(_) => DType::Uint16,
            Self::Int32(_) => DType::Int32,
            Self::Uint32(_) => DType::Uint32,
            Self::Float32(_) => DType::Float32,
            Self::Float64(_) => DType::Float64,
        }
    }

    /// Array shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Converts every pixel to `f64`.
    #[must_use]
    pub fn to_f64(&self) -> ArrayD<f64> {
        with_array!(self, a => a.mapv(f64::from))
    }

    /// Builds typed data from `f64` values.
    ///
    /// Integer targets round to nearest and saturate at the type bounds; NaN
    /// becomes zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(dtype: DType, values: &ArrayD<f64>) -> Self {
        match dtype {
            DType::Int8 => Self::Int8(values.mapv(|v| v.round() as i8)),
            DType::Uint8 => Self::Uint8(values.mapv(|v| v.round() as u8)),
            DType::Int16 => Self::Int16(values.mapv(|v| v.round() as i16)),
            DType::Uint16 => Self::Uint16(values.mapv(|v| v.round() as u16)),
            DType::Int32 => Self::Int32(values.mapv(|v| v.round() as i32)),
            DType::Uint32 => Self::Uint32(values.mapv(|v| v.round() as u32)),
            DType::Float32 => Self::Float32(values.mapv(|v| v as f32)),
            DType::Float64 => Self::Float64(values.clone()),
        }
    }

    /// Reinterprets `int8` pixels as `uint8`.
    ///
    /// Values in `[0, 127]` are unchanged; negative values wrap the way a
    /// plain integer cast does. Other types are returned unchanged.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn widen_int8(self) -> Self {
        match self {
            Self::Int8(a) => Self::Uint8(a.mapv(|v| v as u8)),
            other => other,
        }
    }

    /// Drops a leading axis of length one.
    #[must_use]
    pub fn squeeze_leading(self) -> Self {
        if self.ndim() == 3 && self.shape()[0] == 1 {
            map_array!(self, a => a.index_axis_move(Axis(0), 0))
        } else {
            self
        }
    }

    /// Adds a leading axis of length one.
    #[must_use]
    pub fn with_leading_axis(self) -> Self {
        map_array!(self, a => a.insert_axis(Axis(0)))
    }

    /// Pixel values in row-major order, as `f64`.
    #[must_use]
    pub fn values_f64(&self) -> Vec<f64> {
        with_array!(self, a => a.iter().map(|v| f64::from(*v)).collect())
    }

    /// A zero-filled array of the given type and shape.
    #[must_use]
    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        Self::from_f64(dtype, &ArrayD::zeros(IxDyn(shape)))
    }
}

/// One named band.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    /// Pixel data.
    pub data: BandData,
    /// Nodata value.
    pub nodata: Option<f64>,
    /// Units, `"1"` when dimensionless.
    pub units: String,
}

impl Band {
    /// Creates a band with no nodata value.
    #[must_use]
    pub fn new(data: BandData) -> Self {
        Self {
            data,
            nodata: None,
            units: "1".to_string(),
        }
    }

    /// Sets the nodata value.
    #[must_use]
    pub const fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Describes the band.
    #[must_use]
    pub fn describe(&self, name: &str) -> Measurement {
        Measurement {
            name: name.to_string(),
            dtype: self.data.dtype(),
            nodata: self.nodata,
            units: self.units.clone(),
        }
    }
}

/// Description of a band without its pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Band name.
    pub name: String,
    /// Pixel type.
    pub dtype: DType,
    /// Nodata value.
    #[serde(default)]
    pub nodata: Option<f64>,
    /// Units.
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_units() -> String {
    "1".to_string()
}

impl Measurement {
    /// Creates a dimensionless measurement.
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nodata: None,
            units: default_units(),
        }
    }

    /// Sets the nodata value.
    #[must_use]
    pub const fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }
}

/// Affine pixel-to-world transform `x = a*col + b*row + c`, `y = d*col + e*row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine(pub [f64; 6]);

impl Affine {
    /// North-up transform with square or rectangular pixels.
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y])
    }

    /// World coordinates of a (fractional) pixel position.
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * col + b * row + c, d * col + e * row + f)
    }

    /// Fractional pixel position of a world coordinate.
    ///
    /// # Errors
    ///
    /// Returns an error if the transform is not invertible.
    pub fn invert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let [a, b, c, d, e, f] = self.0;
        let det = a * e - b * d;
        if det == 0.0 || !det.is_finite() {
            return Err(Error::execution("pixel grid transform is not invertible"));
        }
        let (dx, dy) = (x - c, y - f);
        Ok(((e * dx - b * dy) / det, (a * dy - d * dx) / det))
    }

    /// Scales pixel size by `factor`, keeping the origin.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        let [a, b, c, d, e, f] = self.0;
        Self([a * factor, b * factor, c, d * factor, e * factor, f])
    }

    /// Absolute pixel area.
    #[must_use]
    pub fn pixel_area(&self) -> f64 {
        let [a, b, _, d, e, _] = self.0;
        (a * e - b * d).abs()
    }
}

/// A pixel grid: size plus transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Pixel-to-world transform.
    pub affine: Affine,
}

impl GeoBox {
    /// Creates a grid.
    #[must_use]
    pub const fn new(width: usize, height: usize, affine: Affine) -> Self {
        Self {
            width,
            height,
            affine,
        }
    }

    /// Coarsens the grid by an integer factor, covering the same extent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn decimate(&self, factor: usize) -> Self {
        let factor = factor.max(1);
        Self {
            width: self.width.div_ceil(factor),
            height: self.height.div_ceil(factor),
            affine: self.affine.scaled(factor as f64),
        }
    }

    /// World bounds `[min_x, min_y, max_x, max_y]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bounds(&self) -> [f64; 4] {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [
            self.affine.apply(0.0, 0.0),
            self.affine.apply(w, 0.0),
            self.affine.apply(0.0, h),
            self.affine.apply(w, h),
        ];
        corners.iter().fold(
            [f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |b, &(x, y)| [b[0].min(x), b[1].min(y), b[2].max(x), b[3].max(y)],
        )
    }

    /// `[height, width]`.
    #[must_use]
    pub const fn shape(&self) -> [usize; 2] {
        [self.height, self.width]
    }
}

/// A set of named bands sharing one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDataset {
    /// Bands by name.
    pub bands: BTreeMap<String, Band>,
    /// Shared pixel grid.
    pub geobox: GeoBox,
    /// Coordinate reference system.
    pub crs: Option<String>,
    /// Acquisition times along the leading axis, if any.
    pub time: Vec<DateTime<Utc>>,
}

impl RasterDataset {
    /// Creates an empty dataset on a grid.
    #[must_use]
    pub const fn new(geobox: GeoBox) -> Self {
        Self {
            bands: BTreeMap::new(),
            geobox,
            crs: None,
            time: Vec::new(),
        }
    }

    /// Adds a band.
    #[must_use]
    pub fn with_band(mut self, name: impl Into<String>, band: Band) -> Self {
        self.bands.insert(name.into(), band);
        self
    }

    /// Sets the CRS.
    #[must_use]
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    /// Descriptions of every band.
    #[must_use]
    pub fn measurements(&self) -> BTreeMap<String, Measurement> {
        self.bands
            .iter()
            .map(|(name, band)| (name.clone(), band.describe(name)))
            .collect()
    }

    /// Renames bands, all at once.
    ///
    /// Swaps are allowed. Two bands may not end up under one name.
    ///
    /// # Errors
    ///
    /// Returns an error if a band to rename does not exist, if two bands are
    /// renamed to the same name, or if a new name is taken by a band that
    /// keeps its name.
    pub fn rename(&mut self, renames: &BTreeMap<String, String>) -> Result<()> {
        if let Some(from) = renames.keys().find(|from| !self.bands.contains_key(*from)) {
            return Err(Error::execution(format!(
                "cannot rename missing measurement '{from}'"
            )));
        }
        let mut targets = BTreeSet::new();
        for to in renames.values() {
            if !targets.insert(to) {
                return Err(Error::configuration(format!(
                    "more than one measurement is renamed to '{to}'"
                )));
            }
            if self.bands.contains_key(to) && !renames.contains_key(to) {
                return Err(Error::configuration(format!(
                    "rename target '{to}' is already a loaded measurement"
                )));
            }
        }
        let bands = std::mem::take(&mut self.bands);
        self.bands = bands
            .into_iter()
            .map(|(name, band)| (renames.get(&name).cloned().unwrap_or(name), band))
            .collect();
        Ok(())
    }

    /// Gives every band a leading time axis of length one.
    pub fn add_time_axis(&mut self, time: Vec<DateTime<Utc>>) {
        let bands = std::mem::take(&mut self.bands);
        self.bands = bands
            .into_iter()
            .map(|(name, mut band)| {
                band.data = band.data.with_leading_axis();
                (name, band)
            })
            .collect();
        self.time = time;
    }

    /// Drops a time axis of length one from every band.
    pub fn squeeze_time(&mut self) {
        let bands = std::mem::take(&mut self.bands);
        self.bands = bands
            .into_iter()
            .map(|(name, mut band)| {
                band.data = band.data.squeeze_leading();
                (name, band)
            })
            .collect();
        if self.time.len() == 1 {
            self.time.clear();
        }
    }

    /// Widens every `int8` band to `uint8`. Returns the widened band names.
    pub fn widen_int8(&mut self) -> Vec<String> {
        let mut widened = Vec::new();
        for (name, band) in &mut self.bands {
            if band.data.dtype() == DType::Int8 {
                let data = std::mem::replace(&mut band.data, BandData::Uint8(ArrayD::zeros(IxDyn(&[0]))));
                band.data = data.widen_int8();
                widened.push(name.clone());
            }
        }
        widened
    }
}

//! Rendering preview images from output bands.

use std::collections::BTreeMap;

use crate::raster::Band;
use crate::error::{Error, Result};

/// Longest side of a preview, in pixels.
pub const PREVIEW_SIZE: usize = 1024;

/// An 8-bit RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rgb8 {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Interleaved RGB samples, row-major.
    pub pixels: Vec<u8>,
}

/// A 2-D band sampled down to preview size, with invalid pixels as `None`.
struct Sampled {
    width: usize,
    height: usize,
    values: Vec<Option<f64>>,
}

fn sample(band: &Band) -> Result<Sampled> {
    let [height, width] = <[usize; 2]>::try_from(band.data.shape())
        .map_err(|_| Error::publish("previews need 2-D bands"))?;
    let step = width.max(height).div_ceil(PREVIEW_SIZE).max(1);
    let all = band.data.values_f64();
    let valid = |v: f64| !v.is_nan() && band.nodata.is_none_or(|nd| v != nd);

    let (w, h) = (width.div_ceil(step), height.div_ceil(step));
    let mut values = Vec::with_capacity(w * h);
    for row in (0..height).step_by(step) {
        for col in (0..width).step_by(step) {
            let v = all[row * width + col];
            values.push(valid(v).then_some(v));
        }
    }
    Ok(Sampled {
        width: w,
        height: h,
        values,
    })
}

/// Linear stretch of the valid range onto `1..=255`; invalid pixels are 0.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn stretch(values: &[Option<f64>]) -> Vec<u8> {
    let (lo, hi) = values
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    values
        .iter()
        .map(|v| match v {
            None => 0,
            Some(_) if range <= 0.0 => 255,
            Some(v) => (1.0 + (v - lo) / range * 254.0).round() as u8,
        })
        .collect()
}

/// Renders three bands as red, green and blue.
///
/// # Errors
///
/// Returns [`Error::Publish`] if the bands are not 2-D or differ in shape.
pub fn rgb(red: &Band, green: &Band, blue: &Band) -> Result<Rgb8> {
    let channels = [sample(red)?, sample(green)?, sample(blue)?];
    let (width, height) = (channels[0].width, channels[0].height);
    if channels.iter().any(|c| c.width != width || c.height != height) {
        return Err(Error::publish("preview bands differ in shape"));
    }
    let stretched: Vec<Vec<u8>> = channels.iter().map(|c| stretch(&c.values)).collect();
    let pixels = (0..width * height)
        .flat_map(|i| [stretched[0][i], stretched[1][i], stretched[2][i]])
        .collect();
    Ok(Rgb8 {
        width,
        height,
        pixels,
    })
}

/// Renders one band through a value → colour table.
///
/// Values not in the table render as grey scale.
///
/// # Errors
///
/// Returns [`Error::Publish`] if the band is not 2-D.
pub fn singleband(band: &Band, lookup_table: &BTreeMap<String, [u8; 3]>) -> Result<Rgb8> {
    let sampled = sample(band)?;
    let grey = stretch(&sampled.values);
    let pixels = sampled
        .values
        .iter()
        .zip(grey)
        .flat_map(|(v, g)| {
            v.and_then(|v| lookup_table.get(&table_key(v)).copied())
                .unwrap_or([g, g, g])
        })
        .collect();
    Ok(Rgb8 {
        width: sampled.width,
        height: sampled.height,
        pixels,
    })
}

/// Integral values are looked up without a fractional part (`3`, not `3.0`).
#[allow(clippy::cast_possible_truncation)]
fn table_key(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::BandData;
    use ndarray::{arr2, ArrayD, IxDyn};

    fn band(values: [[u8; 2]; 2]) -> Band {
        Band::new(BandData::Uint8(arr2(&values).into_dyn()))
    }

    #[test]
    fn rgb_stretches_each_channel() {
        let img = rgb(&band([[0, 10], [20, 30]]), &band([[5, 5], [5, 5]]), &band([[1, 2], [3, 4]]))
            .expect("render");
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(&img.pixels[0..3], &[1, 255, 1]);
        assert_eq!(&img.pixels[9..12], &[255, 255, 255]);
    }

    #[test]
    fn nodata_renders_black() {
        let b = band([[0, 10], [20, 30]]).with_nodata(0.0);
        let img = singleband(&b, &BTreeMap::new()).expect("render");
        assert_eq!(&img.pixels[0..3], &[0, 0, 0]);
    }

    #[test]
    fn lookup_table_colours_listed_values() {
        let table = BTreeMap::from([("1".to_string(), [0, 0, 255])]);
        let img = singleband(&band([[1, 2], [1, 2]]), &table).expect("render");
        assert_eq!(&img.pixels[0..3], &[0, 0, 255]);
        assert_eq!(&img.pixels[3..6], &[255, 255, 255]);
    }

    #[test]
    fn large_bands_are_subsampled() {
        let b = Band::new(BandData::Uint8(ArrayD::zeros(IxDyn(&[10, 3000]))));
        let img = singleband(&b, &BTreeMap::new()).expect("render");
        assert_eq!((img.width, img.height), (1000, 4));
    }

    #[test]
    fn three_dimensional_bands_are_rejected() {
        let b = Band::new(BandData::Uint8(ArrayD::zeros(IxDyn(&[1, 2, 2]))));
        assert!(singleband(&b, &BTreeMap::new()).is_err());
    }
}

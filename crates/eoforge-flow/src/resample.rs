//! Resampling bands onto a common grid.
//!
//! Every destination pixel is mapped through its centre into the source grid.
//! `nearest` and `bilinear` sample at that point; the aggregating methods
//! collect every valid source pixel under the destination pixel's footprint.
//! Nodata and NaN source pixels never contribute; a destination pixel with no
//! valid contribution is set to the band's nodata value (NaN for floats
//! without one, zero for integers without one).

use ndarray::{Array2, ArrayD, Ix2};

use eoforge_core::config::Resampling;

use crate::error::{Error, Result};
use crate::raster::{Band, BandData, GeoBox};

/// Resamples a 2-D band from `src` onto `dst`.
///
/// # Errors
///
/// Returns [`Error::TransformExecution`] if the band is not 2-D or the
/// source grid transform is not invertible.
pub fn resample_band(band: &Band, src: &GeoBox, dst: &GeoBox, method: Resampling) -> Result<Band> {
    if src == dst {
        return Ok(band.clone());
    }
    let values = band
        .data
        .to_f64()
        .into_dimensionality::<Ix2>()
        .map_err(|e| Error::execution(format!("resampling expects a 2-D band: {e}")))?;
    let fill = band.nodata.unwrap_or(f64::NAN);
    let valid = |v: f64| !v.is_nan() && band.nodata.is_none_or(|nd| v != nd);

    let mut out = Array2::<f64>::from_elem((dst.height, dst.width), fill);
    for row in 0..dst.height {
        for col in 0..dst.width {
            let value = match method {
                Resampling::Nearest => nearest(&values, src, dst, row, col, &valid)?,
                Resampling::Bilinear => bilinear(&values, src, dst, row, col, &valid)?,
                _ => {
                    let samples = footprint(&values, src, dst, row, col, &valid)?;
                    if samples.is_empty() {
                        nearest(&values, src, dst, row, col, &valid)?
                    } else {
                        Some(aggregate(method, samples))
                    }
                }
            };
            if let Some(v) = value {
                out[[row, col]] = v;
            }
        }
    }

    Ok(Band {
        data: BandData::from_f64(band.data.dtype(), &out.into_dyn()),
        nodata: band.nodata,
        units: band.units.clone(),
    })
}

#[allow(clippy::cast_precision_loss)]
fn source_position(src: &GeoBox, dst: &GeoBox, row: usize, col: usize) -> Result<(f64, f64)> {
    let (x, y) = dst.affine.apply(col as f64 + 0.5, row as f64 + 0.5);
    src.affine.invert(x, y)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn index(position: f64, len: usize) -> Option<usize> {
    let i = position.floor();
    (i >= 0.0 && i < len as f64).then_some(i as usize)
}

fn nearest(
    values: &Array2<f64>,
    src: &GeoBox,
    dst: &GeoBox,
    row: usize,
    col: usize,
    valid: &impl Fn(f64) -> bool,
) -> Result<Option<f64>> {
    let (c, r) = source_position(src, dst, row, col)?;
    Ok(index(c, src.width)
        .zip(index(r, src.height))
        .map(|(c, r)| values[[r, c]])
        .filter(|v| valid(*v)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn bilinear(
    values: &Array2<f64>,
    src: &GeoBox,
    dst: &GeoBox,
    row: usize,
    col: usize,
    valid: &impl Fn(f64) -> bool,
) -> Result<Option<f64>> {
    let (c, r) = source_position(src, dst, row, col)?;
    let (u, v) = (c - 0.5, r - 0.5);
    let (c0, r0) = (u.floor(), v.floor());
    let (fu, fv) = (u - c0, v - r0);

    let clamp = |i: f64, len: usize| -> usize { (i.max(0.0) as usize).min(len.saturating_sub(1)) };
    let mut total = 0.0;
    let mut weight = 0.0;
    for (dr, wr) in [(0.0, 1.0 - fv), (1.0, fv)] {
        for (dc, wc) in [(0.0, 1.0 - fu), (1.0, fu)] {
            let w = wr * wc;
            if w <= 0.0 {
                continue;
            }
            let sample = values[[clamp(r0 + dr, src.height), clamp(c0 + dc, src.width)]];
            if valid(sample) {
                total += sample * w;
                weight += w;
            }
        }
    }
    if weight > 0.0 {
        Ok(Some(total / weight))
    } else {
        nearest(values, src, dst, row, col, valid)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn footprint(
    values: &Array2<f64>,
    src: &GeoBox,
    dst: &GeoBox,
    row: usize,
    col: usize,
    valid: &impl Fn(f64) -> bool,
) -> Result<Vec<f64>> {
    let (x0, y0) = dst.affine.apply(col as f64, row as f64);
    let (x1, y1) = dst.affine.apply(col as f64 + 1.0, row as f64 + 1.0);
    let (c0, r0) = src.affine.invert(x0, y0)?;
    let (c1, r1) = src.affine.invert(x1, y1)?;

    let span = |a: f64, b: f64, len: usize| {
        let lo = a.min(b).floor().max(0.0) as usize;
        let hi = (a.max(b).ceil().max(0.0) as usize).min(len);
        lo..hi
    };
    let mut samples = Vec::new();
    for r in span(r0, r1, src.height) {
        for c in span(c0, c1, src.width) {
            let v = values[[r, c]];
            if valid(v) {
                samples.push(v);
            }
        }
    }
    Ok(samples)
}

#[allow(clippy::cast_precision_loss)]
fn aggregate(method: Resampling, mut samples: Vec<f64>) -> f64 {
    match method {
        Resampling::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
        Resampling::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Resampling::Med => {
            samples.sort_by(f64::total_cmp);
            samples[samples.len() / 2]
        }
        Resampling::Mode => {
            samples.sort_by(f64::total_cmp);
            let mut best = (samples[0], 0_usize);
            let mut run = (samples[0], 0_usize);
            for v in samples {
                if v == run.0 {
                    run.1 += 1;
                } else {
                    run = (v, 1);
                }
                if run.1 > best.1 {
                    best = run;
                }
            }
            best.0
        }
        _ => samples.iter().sum::<f64>() / samples.len() as f64,
    }
}

/// Picks the grid to resample every band onto.
///
/// The `basis` band's grid when configured and loaded, otherwise the finest
/// (smallest pixel area) grid among the loaded bands.
#[must_use]
pub fn common_grid<'a>(
    grids: impl IntoIterator<Item = (&'a str, &'a GeoBox)>,
    basis: Option<&str>,
) -> Option<GeoBox> {
    let grids: Vec<(&str, &GeoBox)> = grids.into_iter().collect();
    if let Some(basis) = basis {
        if let Some((_, grid)) = grids.iter().find(|(name, _)| *name == basis) {
            return Some(**grid);
        }
        tracing::warn!(basis, "basis band not loaded, using the finest grid");
    }
    grids
        .into_iter()
        .min_by(|a, b| a.1.affine.pixel_area().total_cmp(&b.1.affine.pixel_area()))
        .map(|(_, grid)| *grid)
}

/// Converts a `[y, x]` array into a band data value of the given dtype.
#[must_use]
pub fn from_grid(dtype: crate::raster::DType, values: Array2<f64>) -> BandData {
    let values: ArrayD<f64> = values.into_dyn();
    BandData::from_f64(dtype, &values)
}

//! Single-band GeoTIFF reading and writing.
//!
//! Georeferencing is carried in the standard GeoTIFF tags: pixel scale
//! (33550) plus tiepoint (33922), or a full model transformation (34264); the
//! CRS as an EPSG code in the GeoKey directory (34735); and nodata in the
//! GDAL nodata tag (42113).
//!
//! ## Limitations
//!
//! - Only EPSG-coded CRSs are recognised
//! - Output is uncompressed and untiled, without overviews

use std::io::{Cursor, Read, Seek, Write};

use ndarray::{ArrayD, IxDyn};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

use crate::error::{Error, Result};
use crate::raster::{Affine, Band, BandData, GeoBox};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// A decoded single-band GeoTIFF.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTiff {
    /// Pixels as `[y, x]`.
    pub data: BandData,
    /// Number of columns.
    pub width: usize,
    /// Number of rows.
    pub height: usize,
    /// Pixel-to-world transform, if the file is georeferenced.
    pub affine: Option<Affine>,
    /// CRS as `EPSG:<code>`, if recorded.
    pub crs: Option<String>,
    /// Nodata value, if recorded.
    pub nodata: Option<f64>,
}

impl GeoTiff {
    /// The grid, if the file is georeferenced.
    #[must_use]
    pub fn geobox(&self) -> Option<GeoBox> {
        self.affine
            .map(|affine| GeoBox::new(self.width, self.height, affine))
    }
}

fn read_err(e: impl std::fmt::Display) -> Error {
    Error::execution(format!("reading GeoTIFF: {e}"))
}

fn write_err(e: impl std::fmt::Display) -> Error {
    Error::publish(format!("writing GeoTIFF: {e}"))
}

/// Decodes a single-band GeoTIFF.
///
/// # Errors
///
/// Returns [`Error::TransformExecution`] for malformed files, multi-band
/// files, or unsupported pixel types.
pub fn decode(bytes: &[u8]) -> Result<GeoTiff> {
    let mut decoder = Decoder::new(Cursor::new(bytes))
        .map_err(read_err)?
        .with_limits(Limits::unlimited());

    match decoder.colortype().map_err(read_err)? {
        tiff::ColorType::Gray(_) => {}
        other => return Err(read_err(format!("expected a single-band image, got {other:?}"))),
    }
    let (width, height) = decoder.dimensions().map_err(read_err)?;
    let (width, height) = (width as usize, height as usize);
    let shape = IxDyn(&[height, width]);

    let shaped = |e: ndarray::ShapeError| read_err(format!("pixel count does not match size: {e}"));
    let data = match decoder.read_image().map_err(read_err)? {
        DecodingResult::U8(v) => BandData::Uint8(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::I8(v) => BandData::Int8(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::U16(v) => BandData::Uint16(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::I16(v) => BandData::Int16(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::U32(v) => BandData::Uint32(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::I32(v) => BandData::Int32(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::F32(v) => BandData::Float32(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        DecodingResult::F64(v) => BandData::Float64(ArrayD::from_shape_vec(shape, v).map_err(shaped)?),
        _ => return Err(read_err("unsupported pixel type")),
    };

    Ok(GeoTiff {
        data,
        width,
        height,
        affine: read_affine(&mut decoder),
        crs: read_crs(&mut decoder),
        nodata: read_nodata(&mut decoder),
    })
}

fn read_affine<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<Affine> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TRANSFORMATION)) {
        if m.len() >= 8 {
            return Some(Affine([m[0], m[1], m[3], m[4], m[5], m[7]]));
        }
    }
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT)).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint: [i, j, k, x, y, z]
    let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
    let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
    Some(Affine::north_up(origin_x, origin_y, scale[0], scale[1]))
}

fn read_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<String> {
    let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY)).ok()?;
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            matches!(entry[0], PROJECTED_CS_TYPE | GEOGRAPHIC_TYPE) && entry[1] == 0 && entry[3] != 32767
        })
        .map(|entry| format!("EPSG:{}", entry[3]))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let text = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA)).ok()?;
    let text = text.trim_matches(char::from(0)).trim();
    match text.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        _ => text.parse().ok(),
    }
}

/// GeoKey directory for a CRS given as `EPSG:<code>`.
///
/// Codes in the 4000s are treated as geographic, everything else as
/// projected.
fn geo_keys(crs: Option<&str>) -> Vec<u16> {
    let code = crs
        .and_then(|c| c.strip_prefix("EPSG:").or_else(|| c.strip_prefix("epsg:")))
        .and_then(|c| c.parse::<u16>().ok());
    let mut keys = vec![1, 1, 0, 2, GT_MODEL_TYPE, 0, 1, 1, GT_RASTER_TYPE, 0, 1, 1];
    if let Some(code) = code {
        let geographic = (4000..5000).contains(&code);
        keys[3] = 3;
        keys[7] = if geographic { 2 } else { 1 };
        let key = if geographic { GEOGRAPHIC_TYPE } else { PROJECTED_CS_TYPE };
        keys.extend([key, 0, 1, code]);
    }
    keys
}

fn format_nodata(nodata: f64) -> String {
    if nodata.is_nan() {
        "nan".to_string()
    } else {
        format!("{nodata}")
    }
}

struct GeoTags<'a> {
    affine: &'a Affine,
    crs: Option<&'a str>,
    nodata: Option<f64>,
}

#[allow(clippy::cast_possible_truncation)]
fn write_gray<C, W>(writer: W, width: usize, height: usize, data: &[C::Inner], tags: &GeoTags<'_>) -> Result<()>
where
    C: ColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer).map_err(write_err)?;
    let mut image = encoder
        .new_image::<C>(width as u32, height as u32)
        .map_err(write_err)?;

    let [a, b, c, d, e, f] = tags.affine.0;
    if b == 0.0 && d == 0.0 {
        image
            .encoder()
            .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &[a, -e, 0.0][..])
            .map_err(write_err)?;
        image
            .encoder()
            .write_tag(Tag::Unknown(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, c, f, 0.0][..])
            .map_err(write_err)?;
    } else {
        let matrix = [a, b, 0.0, c, d, e, 0.0, f, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        image
            .encoder()
            .write_tag(Tag::Unknown(MODEL_TRANSFORMATION), &matrix[..])
            .map_err(write_err)?;
    }
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &geo_keys(tags.crs)[..])
        .map_err(write_err)?;
    if let Some(nodata) = tags.nodata {
        image
            .encoder()
            .write_tag(Tag::Unknown(GDAL_NODATA), format_nodata(nodata).as_str())
            .map_err(write_err)?;
    }
    image.write_data(data).map_err(write_err)
}

/// Encodes a 2-D band as a GeoTIFF.
///
/// # Errors
///
/// Returns [`Error::Publish`] if the band is not 2-D or has a type GeoTIFF
/// output does not support (`int8`; widen it first).
pub fn encode(band: &Band, geobox: &GeoBox, crs: Option<&str>) -> Result<Vec<u8>> {
    if band.data.shape() != [geobox.height, geobox.width] {
        return Err(write_err(format!(
            "band shape {:?} does not match grid {}x{}",
            band.data.shape(),
            geobox.height,
            geobox.width
        )));
    }
    let tags = GeoTags {
        affine: &geobox.affine,
        crs,
        nodata: band.nodata,
    };
    let (w, h) = (geobox.width, geobox.height);
    let mut buf = Vec::new();
    let sink = Cursor::new(&mut buf);
    match &band.data {
        BandData::Int8(_) => return Err(write_err("int8 bands must be widened before writing")),
        BandData::Uint8(a) => write_gray::<colortype::Gray8, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Int16(a) => write_gray::<colortype::GrayI16, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Uint16(a) => write_gray::<colortype::Gray16, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Int32(a) => write_gray::<colortype::GrayI32, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Uint32(a) => write_gray::<colortype::Gray32, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Float32(a) => write_gray::<colortype::Gray32Float, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
        BandData::Float64(a) => write_gray::<colortype::Gray64Float, _>(sink, w, h, &a.iter().copied().collect::<Vec<_>>(), &tags),
    }?;
    Ok(buf)
}

/// Encodes interleaved 8-bit RGB pixels as a plain TIFF.
///
/// # Errors
///
/// Returns [`Error::Publish`] if the pixel count does not match the size.
#[allow(clippy::cast_possible_truncation)]
pub fn encode_rgb8(width: usize, height: usize, rgb: &[u8]) -> Result<Vec<u8>> {
    if rgb.len() != width * height * 3 {
        return Err(write_err("RGB buffer does not match image size"));
    }
    let mut buf = Vec::new();
    let mut encoder = TiffEncoder::new(Cursor::new(&mut buf)).map_err(write_err)?;
    encoder
        .write_image::<colortype::RGB8>(width as u32, height as u32, rgb)
        .map_err(write_err)?;
    Ok(buf)
}

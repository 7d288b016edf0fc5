//! GeoTIFF encoding and decoding of single-band rasters.
//!
//! Georeferencing is carried by the standard GeoTIFF tags:
//!
//! * ModelPixelScale + ModelTiepoint for north-up rasters, ModelTransformation otherwise
//! * GeoKeyDirectory with the model type and an EPSG code
//! * GDAL_NODATA as an ASCII string

use std::io::{Cursor, Read, Seek, Write};

use axum::body::Bytes;
use ndarray::Array2;
use num_traits::{AsPrimitive, NumCast};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::MosaicistError;
use crate::models::DType;
use crate::raster::{CoordinateReference, GeoMetadata, GeoTransform, ModelType, RasterGrid};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const GT_RASTER_TYPE_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Decode a single-band GeoTIFF.
///
/// Rasters without georeferencing are placed in pixel space.
///
/// # Arguments
///
/// * `bytes`: GeoTIFF file contents
pub fn decode(bytes: &[u8]) -> Result<RasterGrid, MosaicistError> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(MosaicistError::decode)?;
    match decoder.colortype().map_err(MosaicistError::decode)? {
        ColorType::Gray(_) => (),
        other => {
            return Err(MosaicistError::decode(format!(
                "expected a single-band raster, found {:?}",
                other
            )))
        }
    }
    let (width, height) = decoder.dimensions().map_err(MosaicistError::decode)?;
    let transform = read_transform(&mut decoder)?.unwrap_or_default();
    let crs = read_crs(&mut decoder)?;
    let nodata = read_nodata(&mut decoder)?;
    let (dtype, values) = match decoder.read_image().map_err(MosaicistError::decode)? {
        DecodingResult::U8(buf) => (DType::Uint8, widen(buf)),
        DecodingResult::U16(buf) => (DType::Uint16, widen(buf)),
        DecodingResult::U32(buf) => (DType::Uint32, widen(buf)),
        DecodingResult::U64(buf) => (DType::Uint64, widen(buf)),
        DecodingResult::I8(buf) => (DType::Int8, widen(buf)),
        DecodingResult::I16(buf) => (DType::Int16, widen(buf)),
        DecodingResult::I32(buf) => (DType::Int32, widen(buf)),
        DecodingResult::I64(buf) => (DType::Int64, widen(buf)),
        DecodingResult::F32(buf) => (DType::Float32, widen(buf)),
        DecodingResult::F64(buf) => (DType::Float64, widen(buf)),
        #[allow(unreachable_patterns)]
        _ => return Err(MosaicistError::decode("unsupported sample format")),
    };
    let shape = (usize::try_from(height)?, usize::try_from(width)?);
    if values.len() != shape.0 * shape.1 {
        return Err(MosaicistError::decode(format!(
            "expected {} samples, found {}",
            shape.0 * shape.1,
            values.len()
        )));
    }
    let data = Array2::from_shape_vec(shape, values)?;
    Ok(RasterGrid::new(
        data,
        GeoMetadata {
            transform,
            crs,
            dtype,
            nodata,
        },
    ))
}

fn widen<T: AsPrimitive<f64>>(buf: Vec<T>) -> Vec<f64> {
    buf.into_iter().map(|value| value.as_()).collect()
}

fn read_transform<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, MosaicistError> {
    let scale = find_f64_vec(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = find_f64_vec(decoder, MODEL_TIEPOINT)?;
    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if scale.len() < 2 || tiepoint.len() < 6 {
            return Err(MosaicistError::decode("truncated georeferencing tags"));
        }
        // Tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ].
        return Ok(Some(GeoTransform::new(
            tiepoint[3] - tiepoint[0] * scale[0],
            tiepoint[4] + tiepoint[1] * scale[1],
            scale[0],
            -scale[1],
        )));
    }
    if let Some(matrix) = find_f64_vec(decoder, MODEL_TRANSFORMATION)? {
        if matrix.len() < 8 {
            return Err(MosaicistError::decode("truncated georeferencing tags"));
        }
        if matrix[1] != 0.0 || matrix[4] != 0.0 {
            return Err(MosaicistError::decode("rotated rasters are not supported"));
        }
        return Ok(Some(GeoTransform::new(
            matrix[3], matrix[7], matrix[0], matrix[5],
        )));
    }
    Ok(None)
}

fn read_crs<R: Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<CoordinateReference>, MosaicistError> {
    let directory = match decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))
        .map_err(MosaicistError::decode)?
    {
        Some(value) => value.into_u16_vec().map_err(MosaicistError::decode)?,
        None => return Ok(None),
    };
    // Header is [version, revision, minor, count], followed by [key, location, count, value]
    // entries. Only keys stored inline (location 0) are considered.
    let mut model = None;
    let mut epsg = None;
    for entry in directory.get(4..).unwrap_or_default().chunks_exact(4) {
        if entry[1] != 0 {
            continue;
        }
        match entry[0] {
            GT_MODEL_TYPE_KEY => {
                model = match entry[3] {
                    MODEL_TYPE_PROJECTED => Some(ModelType::Projected),
                    MODEL_TYPE_GEOGRAPHIC => Some(ModelType::Geographic),
                    _ => None,
                }
            }
            GEOGRAPHIC_TYPE_KEY | PROJECTED_CS_TYPE_KEY => epsg = Some(entry[3]),
            _ => (),
        }
    }
    Ok(model.zip(epsg).map(|(model, epsg)| CoordinateReference { model, epsg }))
}

fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>, MosaicistError> {
    let value = match decoder
        .find_tag(tag(GDAL_NODATA))
        .map_err(MosaicistError::decode)?
    {
        Some(value) => value.into_string().map_err(MosaicistError::decode)?,
        None => return Ok(None),
    };
    let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| MosaicistError::decode(format!("invalid nodata value {:?}", value)))
}

fn find_f64_vec<R: Read + Seek>(
    decoder: &mut Decoder<R>,
    code: u16,
) -> Result<Option<Vec<f64>>, MosaicistError> {
    decoder
        .find_tag(tag(code))
        .map_err(MosaicistError::decode)?
        .map(|value| value.into_f64_vec().map_err(MosaicistError::decode))
        .transpose()
}

/// Encode a raster as a single-band GeoTIFF using its storage type.
///
/// Fails if a cell value cannot be represented in the storage type, e.g. NaN in an integer
/// raster.
pub fn encode(grid: &RasterGrid) -> Result<Bytes, MosaicistError> {
    let mut buf = Cursor::new(Vec::new());
    match grid.metadata.dtype {
        DType::Uint8 => encode_band::<colortype::Gray8, _>(grid, &mut buf)?,
        DType::Uint16 => encode_band::<colortype::Gray16, _>(grid, &mut buf)?,
        DType::Uint32 => encode_band::<colortype::Gray32, _>(grid, &mut buf)?,
        DType::Uint64 => encode_band::<colortype::Gray64, _>(grid, &mut buf)?,
        DType::Int8 => encode_band::<colortype::GrayI8, _>(grid, &mut buf)?,
        DType::Int16 => encode_band::<colortype::GrayI16, _>(grid, &mut buf)?,
        DType::Int32 => encode_band::<colortype::GrayI32, _>(grid, &mut buf)?,
        DType::Int64 => encode_band::<colortype::GrayI64, _>(grid, &mut buf)?,
        DType::Float32 => encode_band::<colortype::Gray32Float, _>(grid, &mut buf)?,
        DType::Float64 => encode_band::<colortype::Gray64Float, _>(grid, &mut buf)?,
    }
    Ok(Bytes::from(buf.into_inner()))
}

fn encode_band<C, W>(grid: &RasterGrid, writer: W) -> Result<(), MosaicistError>
where
    C: colortype::ColorType,
    C::Inner: NumCast,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let data = grid
        .data
        .iter()
        .map(|&value| {
            num_traits::cast::<f64, C::Inner>(value).ok_or_else(|| MosaicistError::Encode {
                reason: format!(
                    "value {} is not representable as {}",
                    value, grid.metadata.dtype
                ),
            })
        })
        .collect::<Result<Vec<C::Inner>, _>>()?;

    let encode_error = |err: tiff::TiffError| MosaicistError::Encode {
        reason: err.to_string(),
    };
    let mut encoder = TiffEncoder::new(writer).map_err(encode_error)?;
    let mut image = encoder
        .new_image::<C>(u32::try_from(grid.width())?, u32::try_from(grid.height())?)
        .map_err(encode_error)?;

    let transform = grid.metadata.transform;
    if transform.is_north_up() {
        let scale = [transform.pixel_width, -transform.pixel_height, 0.0];
        let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
        image
            .encoder()
            .write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])
            .map_err(encode_error)?;
        image
            .encoder()
            .write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])
            .map_err(encode_error)?;
    } else {
        #[rustfmt::skip]
        let matrix = [
            transform.pixel_width, 0.0, 0.0, transform.origin_x,
            0.0, transform.pixel_height, 0.0, transform.origin_y,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        image
            .encoder()
            .write_tag(tag(MODEL_TRANSFORMATION), &matrix[..])
            .map_err(encode_error)?;
    }

    let geokeys = geo_key_directory(grid.metadata.crs);
    image
        .encoder()
        .write_tag(tag(GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(encode_error)?;

    if let Some(nodata) = grid.metadata.nodata {
        let nodata = nodata.to_string();
        image
            .encoder()
            .write_tag(tag(GDAL_NODATA), nodata.as_str())
            .map_err(encode_error)?;
    }

    image.write_data(&data).map_err(encode_error)?;
    Ok(())
}

fn geo_key_directory(crs: Option<CoordinateReference>) -> Vec<u16> {
    let mut keys = vec![[GT_RASTER_TYPE_KEY, 0, 1, RASTER_PIXEL_IS_AREA]];
    if let Some(crs) = crs {
        let (model_type, crs_key) = match crs.model {
            ModelType::Projected => (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_KEY),
            ModelType::Geographic => (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_KEY),
        };
        keys.insert(0, [GT_MODEL_TYPE_KEY, 0, 1, model_type]);
        keys.push([crs_key, 0, 1, crs.epsg]);
    }
    let mut directory = vec![1, 1, 0, keys.len() as u16];
    directory.extend(keys.into_iter().flatten());
    directory
}

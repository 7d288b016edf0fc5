//! In-memory georeferenced rasters

use ndarray::Array2;

use crate::error::MosaicistError;
use crate::models::DType;

/// Sentinel value marking cells with no data.
pub const NODATA_SENTINEL: f64 = -9999.0;

/// Affine mapping from pixel space to model space, without rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoTransform {
    /// Model X of the upper left corner of the upper left pixel
    pub origin_x: f64,
    /// Model Y of the upper left corner of the upper left pixel
    pub origin_y: f64,
    /// Pixel size along X
    pub pixel_width: f64,
    /// Pixel size along Y, negative for north-up rasters
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Whether rows run from north to south.
    pub fn is_north_up(&self) -> bool {
        self.pixel_height < 0.0
    }

    /// Model coordinates of the centre of the cell at `(row, col)`.
    pub fn cell_centre(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Whether two transforms address the same grid, to within a small fraction of a cell.
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tolerance = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs());
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        close(self.origin_x, other.origin_x)
            && close(self.origin_y, other.origin_y)
            && close(self.pixel_width, other.pixel_width)
            && close(self.pixel_height, other.pixel_height)
    }
}

impl Default for GeoTransform {
    /// Pixel space, north-up.
    fn default() -> Self {
        GeoTransform::new(0.0, 0.0, 1.0, -1.0)
    }
}

/// Model type of a coordinate reference system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelType {
    Projected,
    Geographic,
}

/// Coordinate reference system identified by EPSG code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordinateReference {
    pub model: ModelType,
    pub epsg: u16,
}

impl CoordinateReference {
    /// WGS 84 geographic coordinates.
    pub const WGS84: CoordinateReference = CoordinateReference {
        model: ModelType::Geographic,
        epsg: 4326,
    };
}

/// Georeferencing and storage metadata carried alongside raster cells.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoMetadata {
    pub transform: GeoTransform,
    pub crs: Option<CoordinateReference>,
    pub dtype: DType,
    pub nodata: Option<f64>,
}

/// A single-band raster.
///
/// Cells are held as [f64] regardless of the storage type, indexed `[row, col]`. The storage type
/// is applied again when the raster is encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterGrid {
    pub data: Array2<f64>,
    pub metadata: GeoMetadata,
}

impl RasterGrid {
    pub fn new(data: Array2<f64>, metadata: GeoMetadata) -> Self {
        RasterGrid { data, metadata }
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    /// Human readable description of the grid, used in error messages.
    pub fn describe(&self) -> String {
        format!(
            "{}x{} at ({}, {}) step ({}, {})",
            self.height(),
            self.width(),
            self.metadata.transform.origin_x,
            self.metadata.transform.origin_y,
            self.metadata.transform.pixel_width,
            self.metadata.transform.pixel_height,
        )
    }

    /// Check that `other` shares this raster's shape, transform and coordinate system.
    ///
    /// A missing coordinate system on either side is not treated as a mismatch.
    pub fn ensure_same_grid(&self, other: &RasterGrid) -> Result<(), MosaicistError> {
        let crs_matches = match (self.metadata.crs, other.metadata.crs) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        if self.data.dim() != other.data.dim()
            || !self
                .metadata
                .transform
                .approx_eq(&other.metadata.transform)
            || !crs_matches
        {
            return Err(MosaicistError::ShapeMismatch {
                expected: self.describe(),
                actual: other.describe(),
            });
        }
        Ok(())
    }

    /// Replace the cells, keeping the georeferencing, and mark the result as single precision
    /// with the nodata sentinel.
    pub fn derive(&self, data: Array2<f64>) -> RasterGrid {
        RasterGrid {
            data,
            metadata: GeoMetadata {
                dtype: DType::Float32,
                nodata: Some(NODATA_SENTINEL),
                ..self.metadata.clone()
            },
        }
    }
}

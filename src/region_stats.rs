//! Region statistics over rasters.

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use ndarray_stats::QuantileExt;

use crate::raster::RasterGrid;
use crate::types::Missing;

/// Mean of the raster cells whose centre lies inside `boundary`, excluding negative cells.
///
/// Cells outside the boundary are excluded rather than zero-filled. Returns `None` when no valid
/// cell remains.
pub fn clip_and_mean(raster: &RasterGrid, boundary: &MultiPolygon<f64>) -> Option<f64> {
    let bounds = boundary.bounding_rect()?;
    let valid = Missing::ValidMin(0.0);
    let transform = raster.metadata.transform;
    let (sum, count) = raster
        .data
        .indexed_iter()
        .filter(|((row, col), _)| {
            let (x, y) = transform.cell_centre(*row, *col);
            x >= bounds.min().x
                && x <= bounds.max().x
                && y >= bounds.min().y
                && y <= bounds.max().y
                && boundary.contains(&Point::new(x, y))
        })
        .map(|(_, value)| *value)
        .filter(|value| !value.is_nan() && valid.is_present(value))
        .fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean of the raster cells, excluding cells equal to the raster's own minimum.
///
/// This is an approximation for rasters whose nodata value is unknown to the caller: the nodata
/// value is assumed to be the smallest cell. Valid cells that happen to equal the minimum are
/// excluded too. Returns `None` when every cell equals the minimum.
pub fn mean_excluding_minimum(raster: &RasterGrid) -> Option<f64> {
    let minimum = *raster.data.min_skipnan();
    if minimum.is_nan() {
        return None;
    }
    let missing = Missing::MissingValue(minimum);
    let (sum, count) = raster
        .data
        .iter()
        .filter(|value| !value.is_nan() && missing.is_present(value))
        .fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

//! Raster aggregations.
//!
//! Each aggregation is implemented as a struct that implements the
//! [Aggregation](crate::operation::Aggregation) trait. Cells equal to
//! [NODATA_SENTINEL](crate::raster::NODATA_SENTINEL) are missing; missing results are written
//! back as the sentinel.

use ndarray::{Array2, Zip};

use crate::error::MosaicistError;
use crate::models::AggregationMode;
use crate::operation::Aggregation;
use crate::raster::{RasterGrid, NODATA_SENTINEL};
use crate::types::Missing;

const NODATA: Missing<f64> = Missing::MissingValue(NODATA_SENTINEL);

/// Convert a cell to NaN if it is missing.
fn to_marker(value: f64) -> f64 {
    if NODATA.is_missing(&value) {
        f64::NAN
    } else {
        value
    }
}

/// Convert a NaN result back to the sentinel.
fn from_marker(value: f64) -> f64 {
    if value.is_nan() {
        NODATA_SENTINEL
    } else {
        value
    }
}

/// Cell-wise mean across a sequence of rasters sharing one grid.
///
/// Missing cells are excluded from that cell's mean. A cell missing in every raster is missing in
/// the result.
pub fn average(grids: &[RasterGrid]) -> Result<RasterGrid, MosaicistError> {
    let (first, rest) = grids.split_first().ok_or(MosaicistError::EmptyResult)?;
    for grid in rest {
        first.ensure_same_grid(grid)?;
    }
    let mut sum = Array2::<f64>::zeros(first.data.dim());
    let mut count = Array2::<u32>::zeros(first.data.dim());
    for grid in grids {
        Zip::from(&mut sum)
            .and(&mut count)
            .and(&grid.data)
            .for_each(|sum, count, &value| {
                if !value.is_nan() && NODATA.is_present(&value) {
                    *sum += value;
                    *count += 1;
                }
            });
    }
    let mean = Zip::from(&sum)
        .and(&count)
        .map_collect(|&sum, &count| match count {
            0 => NODATA_SENTINEL,
            count => sum / f64::from(count),
        });
    Ok(first.derive(mean))
}

/// Cell-wise `a - b`. Missing in either operand yields missing.
pub fn difference(a: &RasterGrid, b: &RasterGrid) -> Result<RasterGrid, MosaicistError> {
    a.ensure_same_grid(b)?;
    let result = Zip::from(&a.data)
        .and(&b.data)
        .map_collect(|&a, &b| from_marker(to_marker(a) - to_marker(b)));
    Ok(a.derive(result))
}

/// Cell-wise `(a - b) / b * 100`. Missing in either operand, or `b` equal to zero, yields
/// missing.
pub fn percent_anomaly(a: &RasterGrid, b: &RasterGrid) -> Result<RasterGrid, MosaicistError> {
    a.ensure_same_grid(b)?;
    let result = Zip::from(&a.data).and(&b.data).map_collect(|&a, &b| {
        let b = if b == 0.0 { f64::NAN } else { to_marker(b) };
        let a = to_marker(a);
        from_marker((a - b) / b * 100.0)
    });
    Ok(a.derive(result))
}

fn require_baseline(baseline: Option<&RasterGrid>) -> Result<&RasterGrid, MosaicistError> {
    baseline.ok_or_else(|| MosaicistError::validation("a climatology baseline is required"))
}

/// Mean of the retrieved instants.
pub struct Average {}

impl Aggregation for Average {
    const MODE: AggregationMode = AggregationMode::Average;
    const NEEDS_BASELINE: bool = false;

    fn execute(
        observed: &[RasterGrid],
        _baseline: Option<&RasterGrid>,
    ) -> Result<RasterGrid, MosaicistError> {
        average(observed)
    }
}

/// Mean of the retrieved instants minus the climatology.
pub struct Difference {}

impl Aggregation for Difference {
    const MODE: AggregationMode = AggregationMode::Difference;
    const NEEDS_BASELINE: bool = true;

    fn execute(
        observed: &[RasterGrid],
        baseline: Option<&RasterGrid>,
    ) -> Result<RasterGrid, MosaicistError> {
        let mean = average(observed)?;
        difference(&mean, require_baseline(baseline)?)
    }
}

/// Mean of the retrieved instants relative to the climatology, in percent.
pub struct PercentAnomaly {}

impl Aggregation for PercentAnomaly {
    const MODE: AggregationMode = AggregationMode::PercentAnomaly;
    const NEEDS_BASELINE: bool = true;

    fn execute(
        observed: &[RasterGrid],
        baseline: Option<&RasterGrid>,
    ) -> Result<RasterGrid, MosaicistError> {
        let mean = average(observed)?;
        percent_anomaly(&mean, require_baseline(baseline)?)
    }
}

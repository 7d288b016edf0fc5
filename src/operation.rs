use crate::error::MosaicistError;
use crate::models::AggregationMode;
use crate::raster::RasterGrid;

/// Trait for time series aggregations.
///
/// This forms the contract between the API layer and the aggregation engine. Implementors are
/// zero-sized markers selecting one [AggregationMode].
pub trait Aggregation: Send + Sync + 'static {
    /// Mode reported alongside the result.
    const MODE: AggregationMode;

    /// Whether the aggregation compares against the climatology baseline.
    const NEEDS_BASELINE: bool;

    /// Execute the aggregation.
    ///
    /// Returns the aggregated raster.
    ///
    /// # Arguments
    ///
    /// * `observed`: Rasters retrieved for the requested instants
    /// * `baseline`: Climatology raster, present when `NEEDS_BASELINE` is set
    fn execute(
        observed: &[RasterGrid],
        baseline: Option<&RasterGrid>,
    ) -> Result<RasterGrid, MosaicistError>;
}

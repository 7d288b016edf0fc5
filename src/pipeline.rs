//! Request pipelines.
//!
//! The aggregation pipelines fetch one coverage per requested instant, decode what was found,
//! aggregate it and encode the result. The mosaic pipelines stage an archive and publish it.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use geo::BoundingRect;
use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::cli::CommandLineArgs;
use crate::coverage::{BoundingBox, Coverage, CoverageSource};
use crate::error::MosaicistError;
use crate::features::Boundary;
use crate::geotiff;
use crate::models::{
    self, AggregateRequest, Credentials, GeoTiffResponse, PublishOutcome, RegionFailure,
    RegionMeanRequest, RegionStats, RegionStatsRequest, RegionValue, StoreState, SyncReport,
    SyncStatus,
};
use crate::mosaic::{self, MosaicLayout, StagingArchive, StagingDir};
use crate::operation::Aggregation;
use crate::operations;
use crate::publisher::{MosaicPublisher, PublishLocks};
use crate::region_stats;
use crate::resource_manager::ResourceManager;
use crate::types::TimeInstant;

/// Feature property used as the region label when the request names none.
pub const DEFAULT_LABEL_FIELD: &str = "name";

/// A monthly series and its climatology baseline, with request overrides applied over the
/// configured defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesTarget {
    pub workspace: String,
    pub coverage_id: String,
    pub climatology_workspace: String,
    pub climatology_year: i32,
    pub month: u8,
    pub instants: Vec<TimeInstant>,
    pub credentials: Option<Credentials>,
}

impl SeriesTarget {
    pub fn resolve(request: &AggregateRequest, args: &CommandLineArgs) -> Self {
        SeriesTarget {
            workspace: request
                .workspace
                .clone()
                .unwrap_or_else(|| args.historical_workspace.clone()),
            coverage_id: request
                .coverage_id
                .clone()
                .unwrap_or_else(|| args.coverage_id.clone()),
            climatology_workspace: request
                .climatology_workspace
                .clone()
                .unwrap_or_else(|| args.climatology_workspace.clone()),
            climatology_year: request.climatology_year.unwrap_or(args.climatology_year),
            month: request.month,
            instants: request
                .years
                .iter()
                .map(|year| TimeInstant::new(*year, request.month))
                .collect(),
            credentials: Credentials::from_parts(&request.user, &request.passw),
        }
    }

    /// Instant of the climatology baseline.
    pub fn baseline_instant(&self) -> TimeInstant {
        TimeInstant::new(self.climatology_year, self.month)
    }
}

/// Fetch a coverage for each instant, skipping instants the map-server holds no data for.
async fn fetch_series<S: CoverageSource>(
    source: &S,
    workspace: &str,
    coverage_id: &str,
    instants: &[TimeInstant],
    credentials: Option<&Credentials>,
) -> Result<Vec<(TimeInstant, Bytes)>, MosaicistError> {
    let mut found = Vec::with_capacity(instants.len());
    for instant in instants {
        match source
            .fetch_coverage(workspace, coverage_id, instant, credentials, None)
            .await?
        {
            Coverage::Found(bytes) => found.push((*instant, bytes)),
            Coverage::NotFound => {
                tracing::info!(%instant, workspace, coverage_id, "no coverage for instant, skipping")
            }
        }
    }
    Ok(found)
}

async fn fetch_baseline<S: CoverageSource>(
    source: &S,
    target: &SeriesTarget,
) -> Result<Bytes, MosaicistError> {
    let instant = target.baseline_instant();
    match source
        .fetch_coverage(
            &target.climatology_workspace,
            &target.coverage_id,
            &instant,
            target.credentials.as_ref(),
            None,
        )
        .await?
    {
        Coverage::Found(bytes) => Ok(bytes),
        Coverage::NotFound => Err(MosaicistError::ClimatologyNotFound {
            instant: instant.label(),
        }),
    }
}

/// Aggregate a monthly series into a GeoTIFF.
///
/// Instants without a coverage are skipped. Fails with [MosaicistError::EmptyResult] when none
/// was found.
///
/// # Arguments
///
/// * `source`: Coverage source
/// * `resource_manager`: ResourceManager object running the CPU-bound steps
/// * `target`: Series to aggregate
#[tracing::instrument(
    level = "DEBUG",
    skip_all,
    fields(mode = %A::MODE, workspace = %target.workspace, coverage_id = %target.coverage_id)
)]
pub async fn aggregate<A: Aggregation, S: CoverageSource>(
    source: &S,
    resource_manager: &ResourceManager,
    target: &SeriesTarget,
) -> Result<GeoTiffResponse, MosaicistError> {
    let found = fetch_series(
        source,
        &target.workspace,
        &target.coverage_id,
        &target.instants,
        target.credentials.as_ref(),
    )
    .await?;
    if found.is_empty() {
        return Err(MosaicistError::EmptyResult);
    }
    let baseline = if A::NEEDS_BASELINE {
        Some(fetch_baseline(source, target).await?)
    } else {
        None
    };
    let instants: Vec<TimeInstant> = found.iter().map(|(instant, _)| *instant).collect();
    tracing::debug!(count = instants.len(), "aggregating coverages");

    let body = resource_manager
        .compute(move || {
            let observed = found
                .iter()
                .map(|(_, bytes)| geotiff::decode(bytes))
                .collect::<Result<Vec<_>, _>>()?;
            let baseline = baseline
                .map(|bytes| geotiff::decode(&bytes))
                .transpose()?;
            let result = A::execute(&observed, baseline.as_ref())?;
            geotiff::encode(&result)
        })
        .await?;
    Ok(GeoTiffResponse {
        body,
        mode: A::MODE,
        instants,
    })
}

/// Mean of a mosaic over the requested instants, excluding the cells equal to its minimum.
#[tracing::instrument(
    level = "DEBUG",
    skip_all,
    fields(workspace = %request.workspace, mosaic_name = %request.mosaic_name)
)]
pub async fn region_mean<S: CoverageSource>(
    source: &S,
    resource_manager: &ResourceManager,
    request: &RegionMeanRequest,
) -> Result<RegionValue, MosaicistError> {
    let credentials = Credentials::from_parts(&request.user, &request.passw);
    let found = fetch_series(
        source,
        &request.workspace,
        &request.mosaic_name,
        &request.instants(),
        credentials.as_ref(),
    )
    .await?;
    if found.is_empty() {
        return Err(MosaicistError::EmptyResult);
    }
    resource_manager
        .compute(move || {
            let grids = found
                .iter()
                .map(|(_, bytes)| geotiff::decode(bytes))
                .collect::<Result<Vec<_>, _>>()?;
            let mean = operations::average(&grids)?;
            Ok(region_stats::mean_excluding_minimum(&mean).into())
        })
        .await
}

/// Bounding box enclosing every boundary.
fn extent(boundaries: &[Boundary]) -> Option<BoundingBox> {
    boundaries
        .iter()
        .filter_map(|boundary| boundary.shape.bounding_rect())
        .map(|rect| BoundingBox {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        })
        .reduce(|a, b| BoundingBox {
            min_x: a.min_x.min(b.min_x),
            min_y: a.min_y.min(b.min_y),
            max_x: a.max_x.max(b.max_x),
            max_y: a.max_y.max(b.max_y),
        })
}

/// Per-region means of one store on one date.
async fn region_cell<S: CoverageSource>(
    source: &S,
    resource_manager: &ResourceManager,
    workspace: &str,
    store: &str,
    date: &TimeInstant,
    credentials: Option<&Credentials>,
    boundaries: Arc<Vec<Boundary>>,
) -> Result<Vec<(String, RegionValue)>, MosaicistError> {
    let clip = extent(&boundaries);
    let bytes = match source
        .fetch_coverage(workspace, store, date, credentials, clip.as_ref())
        .await?
    {
        Coverage::Found(bytes) => bytes,
        Coverage::NotFound => return Err(MosaicistError::EmptyResult),
    };
    // Fan out over the regions only when already running on the Rayon pool.
    let parallel = resource_manager.uses_rayon();
    resource_manager
        .compute(move || {
            let raster = geotiff::decode(&bytes)?;
            let region_mean = |boundary: &Boundary| {
                let value = region_stats::clip_and_mean(&raster, &boundary.shape);
                (boundary.label.clone(), RegionValue::from(value))
            };
            Ok(if parallel {
                boundaries.par_iter().map(region_mean).collect()
            } else {
                boundaries.iter().map(region_mean).collect()
            })
        })
        .await
}

/// Per-region means of each store on each date.
///
/// Boundaries are fetched once. A failure for one (date, store) pair is logged and reported in
/// [RegionStats::failures] without aborting the others; its cells are left out of the table.
#[tracing::instrument(
    level = "DEBUG",
    skip_all,
    fields(workspace = %request.workspace, boundaries = %request.shp_store)
)]
pub async fn region_stats<S: CoverageSource>(
    source: &S,
    resource_manager: &ResourceManager,
    request: &RegionStatsRequest,
) -> Result<RegionStats, MosaicistError> {
    let credentials = Credentials::from_parts(&request.user, &request.passw);
    let label_field = request
        .label_field
        .as_deref()
        .unwrap_or(DEFAULT_LABEL_FIELD);
    let features = source
        .fetch_features(
            &request.shp_workspace,
            &request.shp_store,
            request.max_features,
            credentials.as_ref(),
        )
        .await?;
    let boundaries = Arc::new(features.boundaries(label_field)?);
    tracing::debug!(count = boundaries.len(), "fetched region boundaries");

    let mut stats = RegionStats::default();
    for date in &request.dates {
        let season = date.label();
        for store in &request.stores {
            match region_cell(
                source,
                resource_manager,
                &request.workspace,
                store,
                date,
                credentials.as_ref(),
                boundaries.clone(),
            )
            .await
            {
                Ok(values) => {
                    for (label, value) in values {
                        stats
                            .body
                            .entry(label)
                            .or_default()
                            .entry(season.clone())
                            .or_default()
                            .insert(store.clone(), value);
                    }
                }
                Err(error) => {
                    tracing::warn!(%season, store, %error, "failed to compute region statistics");
                    stats.failures.push(RegionFailure {
                        season: season.clone(),
                        store: store.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }
    }
    Ok(stats)
}

/// Stage an archive on a blocking thread.
///
/// The staging directory is handed back with the archive so that it outlives the publish.
async fn stage_blocking(
    tile_dir: PathBuf,
    props_dir: PathBuf,
    staging: StagingDir,
) -> Result<(StagingDir, StagingArchive), MosaicistError> {
    let (staging, archive) = tokio::task::spawn_blocking(move || {
        let archive = mosaic::stage(&tile_dir, &props_dir, &staging);
        (staging, archive)
    })
    .await?;
    Ok((staging, archive?))
}

/// Publish one uploaded tile to a mosaic store.
///
/// The tile is written to a fresh staging directory, packaged with the mosaic descriptors and
/// published while holding the store's lock. The staging directory is removed afterwards whatever
/// the outcome.
///
/// # Arguments
///
/// * `publisher`: Publisher of the target workspace
/// * `locks`: Per-store publish locks
/// * `layout`: Filesystem roots
/// * `catalog_key`: Identifies the catalog in lock keys, e.g. its URL
/// * `store`: Mosaic store
/// * `filename`: Validated tile file name
/// * `contents`: Tile contents
#[tracing::instrument(level = "DEBUG", skip(publisher, locks, layout, contents))]
pub async fn publish_upload<C: Catalog>(
    publisher: &MosaicPublisher<C>,
    locks: &PublishLocks,
    layout: &MosaicLayout,
    catalog_key: &str,
    store: &str,
    filename: &str,
    contents: Bytes,
) -> Result<PublishOutcome, MosaicistError> {
    let _guard = locks
        .acquire(catalog_key, publisher.workspace(), store)
        .await;
    let staging = StagingDir::create(&layout.staging_root)?;
    let tile_dir = staging.tiles().join(store);
    tokio::fs::create_dir_all(&tile_dir).await?;
    tokio::fs::write(tile_dir.join(filename), &contents).await?;

    let (_staging, archive) =
        stage_blocking(tile_dir, layout.properties_root.clone(), staging).await?;
    let state = publisher.publish(store, &archive).await?;
    Ok(PublishOutcome {
        store: store.to_string(),
        state,
    })
}

async fn sync_store<C: Catalog>(
    publisher: &MosaicPublisher<C>,
    locks: &PublishLocks,
    layout: &MosaicLayout,
    catalog_key: &str,
    store: &str,
) -> Result<StoreState, MosaicistError> {
    models::validate_name(store)?;
    let _guard = locks
        .acquire(catalog_key, publisher.workspace(), store)
        .await;
    let staging = StagingDir::create(&layout.staging_root)?;
    let (_staging, archive) = stage_blocking(
        layout.layers_root.join(store),
        layout.properties_root.clone(),
        staging,
    )
    .await?;
    publisher.publish(store, &archive).await
}

/// Create or update a mosaic store for every store directory under the layers root.
///
/// Stores are published one after another. A failed store is reported and does not stop the
/// others.
#[tracing::instrument(level = "DEBUG", skip(publisher, locks, layout))]
pub async fn sync_layers<C: Catalog>(
    publisher: &MosaicPublisher<C>,
    locks: &PublishLocks,
    layout: &MosaicLayout,
    catalog_key: &str,
) -> Result<SyncReport, MosaicistError> {
    let mut report = SyncReport {
        success: true,
        ..Default::default()
    };
    for store in layout.stores()? {
        let status = match sync_store(publisher, locks, layout, catalog_key, &store).await {
            Ok(state) => state.into(),
            Err(error) => {
                tracing::warn!(store, %error, "failed to sync store");
                SyncStatus::Failed
            }
        };
        report.success &= status != SyncStatus::Failed;
        report.stores.insert(store, status);
    }
    tracing::info!(success = report.success, stores = report.stores.len(), "synced layers");
    Ok(report)
}

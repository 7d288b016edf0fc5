//! Mosaicist web application

use crate::app_state::{AppState, SharedAppState};
use crate::catalog::Catalog;
use crate::cli::CommandLineArgs;
use crate::error::MosaicistError;
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models::{
    self, AggregateRequest, CatalogRequest, GeoTiffResponse, JsonBody, PublishData,
    PublishOutcome, RegionMeanRequest, RegionStats, RegionStatsRequest, RegionValue, SyncReport,
};
use crate::mosaic::MosaicLayout;
use crate::operation::Aggregation;
use crate::operations::{Average, Difference, PercentAnomaly};
use crate::pipeline::{self, SeriesTarget};
use crate::publisher::MosaicPublisher;
use crate::validated_json::ValidatedJson;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use validator::Validate;

static HEADER_MODE: header::HeaderName = header::HeaderName::from_static("x-mosaicist-mode");
static HEADER_INSTANTS: header::HeaderName =
    header::HeaderName::from_static("x-mosaicist-instants");

/// Maximum size of a multipart tile upload.
const UPLOAD_LIMIT: usize = 512 * 1024 * 1024;

impl IntoResponse for GeoTiffResponse {
    fn into_response(self) -> Response {
        (
            [
                (&header::CONTENT_TYPE, "image/tiff".to_string()),
                (&HEADER_MODE, self.mode.to_string()),
                (
                    &HEADER_INSTANTS,
                    self.instants
                        .iter()
                        .map(|instant| instant.label())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            ],
            self.body,
        )
            .into_response()
    }
}

/// Initialise the application
pub fn init(args: &CommandLineArgs) {
    if args.use_rayon {
        if let Some(thread_limit) = args.thread_limit {
            if let Err(error) = rayon::ThreadPoolBuilder::new()
                .num_threads(thread_limit)
                .build_global()
            {
                tracing::warn!(%error, "failed to configure the rayon thread pool");
            }
        }
    }
    MosaicLayout::new(args)
        .create_dirs()
        .expect("failed to create the layers and staging directories");
}

/// Returns a [axum::Router] for the Mosaicist application
///
/// # Arguments
///
/// * `args`: Command line arguments
fn router(args: &CommandLineArgs) -> Router {
    let state: SharedAppState = Arc::new(AppState::new(args));

    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/average", post(aggregate_handler::<Average>))
            .route("/difference", post(aggregate_handler::<Difference>))
            .route("/percent_anomaly", post(aggregate_handler::<PercentAnomaly>))
            .route("/region_mean", post(region_mean))
            .route("/region_stats", post(region_stats))
            .route(
                "/mosaics/publish",
                post(publish).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
            )
            .route("/mosaics/stores", post(stores))
            .route("/mosaics/sync", post(sync))
    }

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/subtract_rasters", post(aggregate_handler::<Difference>))
        .nest("/v1", v1())
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(request_counter)
                    .on_response(record_response_metrics),
            ),
        )
        .with_state(state)
}

/// The Mosaicist service type.
pub type Service = NormalizePath<Router>;

/// Returns a [crate::app::Service] for the Mosaicist application
///
/// Trailing slashes are trimmed from request paths before routing.
///
/// # Arguments
///
/// * `args`: Command line arguments
pub fn service(args: &CommandLineArgs) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(args))
}

async fn health() -> &'static str {
    "OK"
}

/// Handler for time series aggregations
///
/// Returns the aggregated raster as a GeoTIFF.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `request`: Aggregation request data
async fn aggregate_handler<A: Aggregation>(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<AggregateRequest>,
) -> Result<GeoTiffResponse, MosaicistError> {
    let target = SeriesTarget::resolve(&request, &state.args);
    pipeline::aggregate::<A, _>(&state.ows, &state.resource_manager, &target).await
}

async fn region_mean(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<RegionMeanRequest>,
) -> Result<Json<JsonBody<RegionValue>>, MosaicistError> {
    let value = pipeline::region_mean(&state.ows, &state.resource_manager, &request).await?;
    Ok(Json(JsonBody::new(value)))
}

async fn region_stats(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<RegionStatsRequest>,
) -> Result<Json<RegionStats>, MosaicistError> {
    let stats = pipeline::region_stats(&state.ows, &state.resource_manager, &request).await?;
    Ok(Json(stats))
}

/// Read the `data` and `file` fields of a publish request.
///
/// Both fields are validated before anything is written.
async fn read_upload(
    mut multipart: Multipart,
) -> Result<(PublishData, String, Bytes), MosaicistError> {
    let mut data = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("data") => {
                let text = field.text().await?;
                let value: PublishData = serde_json::from_str(&text).map_err(|error| {
                    MosaicistError::validation(format!("data field is not valid: {}", error))
                })?;
                data = Some(value);
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| MosaicistError::validation("file field has no file name"))?;
                file = Some((filename, field.bytes().await?));
            }
            _ => tracing::debug!(field = ?name, "ignoring multipart field"),
        }
    }
    let data = data.ok_or_else(|| MosaicistError::validation("missing data field"))?;
    data.validate()?;
    let (filename, contents) =
        file.ok_or_else(|| MosaicistError::validation("missing file field"))?;
    models::validate_tile_filename(&filename)?;
    Ok((data, filename, contents))
}

/// Handler for tile uploads
///
/// Publishes the uploaded tile to its mosaic store, creating the store if it is absent.
async fn publish(
    State(state): State<SharedAppState>,
    multipart: Multipart,
) -> Result<Json<JsonBody<PublishOutcome>>, MosaicistError> {
    let (data, filename, contents) = read_upload(multipart).await?;
    let catalog = state.catalog(&data.geo_url, data.credentials());
    let publisher = MosaicPublisher::new(catalog, &data.workspace);
    let outcome = pipeline::publish_upload(
        &publisher,
        &state.publish_locks,
        &state.layout,
        publisher.catalog().rest_url().as_str(),
        &data.store,
        &filename,
        contents,
    )
    .await?;
    Ok(Json(JsonBody::new(outcome)))
}

async fn stores(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<CatalogRequest>,
) -> Result<Json<JsonBody<Vec<String>>>, MosaicistError> {
    let catalog = state.catalog(&request.geo_url, request.credentials());
    let stores = catalog.list_stores(&request.workspace).await?;
    Ok(Json(JsonBody::new(stores)))
}

/// Handler for bulk syncs of the layers root
async fn sync(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<CatalogRequest>,
) -> Result<Json<JsonBody<SyncReport>>, MosaicistError> {
    let catalog = state.catalog(&request.geo_url, request.credentials());
    let publisher = MosaicPublisher::new(catalog, &request.workspace);
    let report = pipeline::sync_layers(
        &publisher,
        &state.publish_locks,
        &state.layout,
        publisher.catalog().rest_url().as_str(),
    )
    .await?;
    Ok(Json(JsonBody::new(report)))
}

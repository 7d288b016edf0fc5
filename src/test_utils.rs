use crate::catalog::{Catalog, CoverageResource, StoreInfo};
use crate::cli::CommandLineArgs;
use crate::coverage::{BoundingBox, Coverage, CoverageSource};
use crate::error::MosaicistError;
use crate::features::FeatureCollection;
use crate::geotiff;
use crate::models::*;
use crate::raster::{
    CoordinateReference, GeoMetadata, GeoTransform, RasterGrid, NODATA_SENTINEL,
};
use crate::types::TimeInstant;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use clap::Parser;
use ndarray::Array2;
use url::Url;

/// Default command line arguments.
pub(crate) fn get_test_args() -> CommandLineArgs {
    CommandLineArgs::parse_from(["mosaicist"])
}

/// Serve a router on an ephemeral local port. Returns the URL of its `/geoserver/` root.
pub(crate) fn serve(router: axum::Router) -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(router.into_make_service());
    tokio::spawn(server);
    Url::parse(&format!("http://{}/geoserver/", addr)).unwrap()
}

/// Create a float32 raster on a small north-up WGS84 grid with the nodata sentinel.
pub(crate) fn grid(data: Array2<f64>) -> RasterGrid {
    RasterGrid::new(
        data,
        GeoMetadata {
            transform: GeoTransform::new(-90.0, 16.0, 0.5, -0.5),
            crs: Some(CoordinateReference::WGS84),
            dtype: DType::Float32,
            nodata: Some(NODATA_SENTINEL),
        },
    )
}

/// Create an AggregateRequest object with only required fields set.
pub(crate) fn get_test_aggregate_request() -> AggregateRequest {
    AggregateRequest {
        years: vec![2020, 2021],
        month: 6,
        user: None,
        passw: None,
        workspace: None,
        climatology_workspace: None,
        coverage_id: None,
        climatology_year: None,
    }
}

/// Create an AggregateRequest object with all fields set.
pub(crate) fn get_test_aggregate_request_optional() -> AggregateRequest {
    AggregateRequest {
        years: vec![2019],
        month: 12,
        user: Some("admin".to_string()),
        passw: Some("secret".to_string()),
        workspace: Some("historical_gt".to_string()),
        climatology_workspace: Some("climatology_gt".to_string()),
        coverage_id: Some("TMAX".to_string()),
        climatology_year: Some(1991),
    }
}

pub(crate) fn get_test_region_mean_request() -> RegionMeanRequest {
    RegionMeanRequest {
        workspace: "seasonal_gt".to_string(),
        mosaic_name: "PREC".to_string(),
        years: Some(vec![2020, 2021]),
        year: None,
        month: 3,
        user: None,
        passw: None,
    }
}

pub(crate) fn get_test_region_stats_request() -> RegionStatsRequest {
    RegionStatsRequest {
        workspace: "seasonal_gt".to_string(),
        stores: vec!["PREC".to_string()],
        dates: vec![TimeInstant::new(2020, 6)],
        shp_workspace: "administrative".to_string(),
        shp_store: "departments".to_string(),
        label_field: None,
        max_features: None,
        user: None,
        passw: None,
    }
}

pub(crate) fn get_test_catalog_request() -> CatalogRequest {
    CatalogRequest {
        workspace: "mosaics".to_string(),
        user: "admin".to_string(),
        passw: "geoserver".to_string(),
        geo_url: Url::parse("http://example.com/geoserver/rest/").unwrap(),
    }
}

pub(crate) fn get_test_publish_data() -> PublishData {
    PublishData {
        workspace: "mosaics".to_string(),
        user: "admin".to_string(),
        passw: "geoserver".to_string(),
        geo_url: Url::parse("http://example.com/geoserver/rest/").unwrap(),
        store: "PREC".to_string(),
    }
}

/// In-memory coverage source.
///
/// Coverages not registered with the source are reported as [Coverage::NotFound].
#[derive(Debug, Default)]
pub(crate) struct FakeCoverageSource {
    coverages: HashMap<(String, String, TimeInstant), Bytes>,
    features: Option<String>,
    fetches: AtomicUsize,
}

impl FakeCoverageSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register the encoded raster for a coverage at an instant.
    pub(crate) fn with_coverage(
        self,
        workspace: &str,
        coverage_id: &str,
        instant: TimeInstant,
        raster: &RasterGrid,
    ) -> Self {
        let bytes = geotiff::encode(raster).unwrap();
        self.with_raw_coverage(workspace, coverage_id, instant, bytes)
    }

    pub(crate) fn with_raw_coverage(
        mut self,
        workspace: &str,
        coverage_id: &str,
        instant: TimeInstant,
        bytes: Bytes,
    ) -> Self {
        self.coverages.insert(
            (workspace.to_string(), coverage_id.to_string(), instant),
            bytes,
        );
        self
    }

    /// Register the GeoJSON returned for any boundary layer.
    pub(crate) fn with_features(mut self, json: &str) -> Self {
        self.features = Some(json.to_string());
        self
    }

    /// Number of coverage requests served.
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CoverageSource for FakeCoverageSource {
    async fn fetch_coverage(
        &self,
        workspace: &str,
        coverage_id: &str,
        instant: &TimeInstant,
        _credentials: Option<&Credentials>,
        _clip: Option<&BoundingBox>,
    ) -> Result<Coverage, MosaicistError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = (workspace.to_string(), coverage_id.to_string(), *instant);
        Ok(match self.coverages.get(&key) {
            Some(bytes) => Coverage::Found(bytes.clone()),
            None => Coverage::NotFound,
        })
    }

    async fn fetch_features(
        &self,
        workspace: &str,
        type_name: &str,
        _max_features: Option<u32>,
        _credentials: Option<&Credentials>,
    ) -> Result<FeatureCollection, MosaicistError> {
        match &self.features {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Err(MosaicistError::Fetch {
                url: format!("{}:{}", workspace, type_name),
                status: reqwest::StatusCode::NOT_FOUND,
            }),
        }
    }
}

/// Catalog mutations recorded by [FakeCatalog].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CatalogEvent {
    Created(String),
    CoverageSaved(String),
    Deleted(String),
    Harvested(String),
}

/// In-memory catalog holding a single workspace.
#[derive(Debug, Default)]
pub(crate) struct FakeCatalog {
    workspace: String,
    stores: Mutex<HashSet<String>>,
    coverages: Mutex<HashMap<String, CoverageResource>>,
    events: Mutex<Vec<CatalogEvent>>,
    fail_coverage_save: AtomicBool,
}

impl FakeCatalog {
    pub(crate) fn with_workspace(workspace: &str) -> Self {
        FakeCatalog {
            workspace: workspace.to_string(),
            ..Default::default()
        }
    }

    /// Make subsequent coverage saves fail, or succeed again.
    pub(crate) fn fail_coverage_save(&self, fail: bool) {
        self.fail_coverage_save.store(fail, Ordering::SeqCst);
    }

    /// The last saved coverage resource of a store.
    pub(crate) fn coverage(&self, store: &str) -> Option<CoverageResource> {
        self.coverages.lock().unwrap().get(store).cloned()
    }

    pub(crate) fn events(&self) -> Vec<CatalogEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: CatalogEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn server_error(path: String) -> MosaicistError {
        MosaicistError::Fetch {
            url: path,
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Catalog for FakeCatalog {
    async fn workspace_exists(&self, workspace: &str) -> Result<bool, MosaicistError> {
        Ok(workspace == self.workspace)
    }

    async fn get_store(
        &self,
        _workspace: &str,
        store: &str,
    ) -> Result<Option<StoreInfo>, MosaicistError> {
        Ok(self
            .stores
            .lock()
            .unwrap()
            .get(store)
            .map(|name| StoreInfo {
                name: name.clone(),
                kind: Some("ImageMosaic".to_string()),
            }))
    }

    async fn list_stores(&self, _workspace: &str) -> Result<Vec<String>, MosaicistError> {
        let mut stores: Vec<String> = self.stores.lock().unwrap().iter().cloned().collect();
        stores.sort();
        Ok(stores)
    }

    async fn create_image_mosaic(
        &self,
        _workspace: &str,
        store: &str,
        _archive: &Path,
    ) -> Result<(), MosaicistError> {
        self.stores.lock().unwrap().insert(store.to_string());
        self.record(CatalogEvent::Created(store.to_string()));
        Ok(())
    }

    async fn get_coverage(
        &self,
        _workspace: &str,
        _store: &str,
        coverage: &str,
    ) -> Result<CoverageResource, MosaicistError> {
        Ok(CoverageResource {
            name: coverage.to_string(),
            supported_formats: vec!["GEOTIFF".to_string(), "GIF".to_string()],
            ..Default::default()
        })
    }

    async fn save_coverage(
        &self,
        _workspace: &str,
        store: &str,
        coverage: &CoverageResource,
    ) -> Result<(), MosaicistError> {
        if self.fail_coverage_save.load(Ordering::SeqCst) {
            return Err(Self::server_error(format!("coverages/{}", coverage.name)));
        }
        self.coverages
            .lock()
            .unwrap()
            .insert(store.to_string(), coverage.clone());
        self.record(CatalogEvent::CoverageSaved(store.to_string()));
        Ok(())
    }

    async fn delete_store(&self, _workspace: &str, store: &str) -> Result<(), MosaicistError> {
        self.stores.lock().unwrap().remove(store);
        self.coverages.lock().unwrap().remove(store);
        self.record(CatalogEvent::Deleted(store.to_string()));
        Ok(())
    }

    async fn harvest_granules(
        &self,
        _workspace: &str,
        store: &str,
        _archive: &Path,
    ) -> Result<(), MosaicistError> {
        if !self.stores.lock().unwrap().contains(store) {
            return Err(Self::server_error(format!("coveragestores/{}", store)));
        }
        self.record(CatalogEvent::Harvested(store.to_string()));
        Ok(())
    }
}

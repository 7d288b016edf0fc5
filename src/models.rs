//! Data types and associated functions and methods

use std::collections::BTreeMap;

use axum::body::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::Display;
use url::Url;
use validator::{Validate, ValidationError};

use crate::types::TimeInstant;

/// Supported raster storage types
#[derive(Clone, Copy, Debug, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DType {
    /// [u8]
    Uint8,
    /// [u16]
    Uint16,
    /// [u32]
    Uint32,
    /// [u64]
    Uint64,
    /// [i8]
    Int8,
    /// [i16]
    Int16,
    /// [i32]
    Int32,
    /// [i64]
    Int64,
    /// [f32]
    Float32,
    /// [f64]
    Float64,
}

/// Aggregation modes over a monthly time series
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum AggregationMode {
    /// Mean of the retrieved instants
    Average,
    /// Mean minus the climatology baseline
    Difference,
    /// Difference relative to the climatology baseline, in percent
    PercentAnomaly,
}

/// Credentials for the remote map-server, forwarded as HTTP basic auth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials from optional request fields. A user without a password sends an empty
    /// password.
    pub fn from_parts(user: &Option<String>, passw: &Option<String>) -> Option<Self> {
        user.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: passw.clone().unwrap_or_default(),
        })
    }
}

lazy_static! {
    // Identifiers used as URL path segments and directory names.
    static ref NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap();
    // Tile file names, e.g. PREC_202006.tif.
    static ref TILE_FILENAME_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9-]+(_[A-Za-z0-9-]+)*_\d{4}(0[1-9]|1[0-2])\.tif$").unwrap();
}

/// Validate a workspace, store or coverage name
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if !NAME_PATTERN.is_match(name) || name.starts_with('.') {
        let mut error = ValidationError::new(
            "names must only contain letters, digits, '_', '-' and '.', and not start with '.'",
        );
        error.add_param("name".into(), &name);
        return Err(error);
    }
    Ok(())
}

/// Validate a list of names
fn validate_names(names: &[String]) -> Result<(), ValidationError> {
    names.iter().try_for_each(|name| validate_name(name))
}

/// Validate a calendar year
fn validate_year(year: i32) -> Result<(), ValidationError> {
    if !(1..=9999).contains(&year) {
        let mut error = ValidationError::new("year must be between 1 and 9999");
        error.add_param("year".into(), &year);
        return Err(error);
    }
    Ok(())
}

/// Validate a list of calendar years
fn validate_years(years: &[i32]) -> Result<(), ValidationError> {
    years.iter().try_for_each(|year| validate_year(*year))
}

/// Validate a list of (year, month) instants
fn validate_instants(instants: &[TimeInstant]) -> Result<(), ValidationError> {
    for instant in instants {
        validate_year(instant.year)?;
        if !(1..=12).contains(&instant.month) {
            let mut error = ValidationError::new("month must be between 1 and 12");
            error.add_param("month".into(), &instant.month);
            return Err(error);
        }
    }
    Ok(())
}

/// Validate the REST catalog URL
fn validate_geo_url(url: &Url) -> Result<(), ValidationError> {
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        let mut error = ValidationError::new("geo_url must be an http or https URL");
        error.add_param("geo_url".into(), &url.as_str());
        return Err(error);
    }
    Ok(())
}

/// Validate an uploaded tile file name
pub fn validate_tile_filename(filename: &str) -> Result<(), ValidationError> {
    if !TILE_FILENAME_PATTERN.is_match(filename) {
        let mut error = ValidationError::new("file name must match <name>_YYYYMM.tif");
        error.add_param("filename".into(), &filename);
        return Err(error);
    }
    Ok(())
}

/// Request data for time series aggregations
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_aggregate_request"))]
pub struct AggregateRequest {
    /// Years to aggregate
    #[validate(
        length(min = 1, message = "years must not be empty"),
        custom = "validate_years"
    )]
    pub years: Vec<i32>,
    /// Month of each year
    #[validate(range(min = 1, max = 12, message = "month must be between 1 and 12"))]
    pub month: u8,
    /// Map-server user
    pub user: Option<String>,
    /// Map-server password
    pub passw: Option<String>,
    /// Workspace holding the monthly series
    #[validate(custom = "validate_name")]
    pub workspace: Option<String>,
    /// Workspace holding the climatology baseline
    #[validate(custom = "validate_name")]
    pub climatology_workspace: Option<String>,
    /// Coverage to fetch
    #[validate(custom = "validate_name")]
    pub coverage_id: Option<String>,
    /// Reference year of the climatology baseline
    pub climatology_year: Option<i32>,
}

/// Validate aggregation request data
fn validate_aggregate_request(request: &AggregateRequest) -> Result<(), ValidationError> {
    if let Some(year) = request.climatology_year {
        validate_year(year)?;
    }
    Ok(())
}

/// Request data for the min-masked mean of a region mosaic
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_region_mean_request"))]
pub struct RegionMeanRequest {
    /// Workspace holding the mosaic
    #[validate(custom = "validate_name")]
    pub workspace: String,
    /// Mosaic coverage name
    #[validate(custom = "validate_name")]
    pub mosaic_name: String,
    /// Years to average
    #[validate(
        length(min = 1, message = "years must not be empty"),
        custom = "validate_years"
    )]
    pub years: Option<Vec<i32>>,
    /// Single year
    pub year: Option<i32>,
    /// Month of each year
    #[validate(range(min = 1, max = 12, message = "month must be between 1 and 12"))]
    pub month: u8,
    /// Map-server user
    pub user: Option<String>,
    /// Map-server password
    pub passw: Option<String>,
}

impl RegionMeanRequest {
    /// Instants addressed by the request.
    pub fn instants(&self) -> Vec<TimeInstant> {
        match (&self.years, self.year) {
            (Some(years), _) => years
                .iter()
                .map(|year| TimeInstant::new(*year, self.month))
                .collect(),
            (None, Some(year)) => vec![TimeInstant::new(year, self.month)],
            (None, None) => vec![],
        }
    }
}

/// Validate region mean request data
fn validate_region_mean_request(request: &RegionMeanRequest) -> Result<(), ValidationError> {
    if request.years.is_some() == request.year.is_some() {
        return Err(ValidationError::new(
            "exactly one of years and year must be specified",
        ));
    }
    if let Some(year) = request.year {
        validate_year(year)?;
    }
    Ok(())
}

/// Request data for per-region statistics
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegionStatsRequest {
    /// Workspace holding the mosaics
    #[validate(custom = "validate_name")]
    pub workspace: String,
    /// Mosaic coverages to summarise
    #[validate(
        length(min = 1, message = "stores must not be empty"),
        custom = "validate_names"
    )]
    pub stores: Vec<String>,
    /// Seasons to summarise
    #[validate(
        length(min = 1, message = "dates must not be empty"),
        custom = "validate_instants"
    )]
    pub dates: Vec<TimeInstant>,
    /// Workspace holding the boundary layer
    #[validate(custom = "validate_name")]
    pub shp_workspace: String,
    /// Boundary layer
    #[validate(custom = "validate_name")]
    pub shp_store: String,
    /// Feature property used as the region label
    #[validate(length(min = 1, message = "label_field must not be empty"))]
    pub label_field: Option<String>,
    /// Maximum number of boundary features to fetch
    #[validate(range(min = 1, message = "max_features must be greater than 0"))]
    pub max_features: Option<u32>,
    /// Map-server user
    pub user: Option<String>,
    /// Map-server password
    pub passw: Option<String>,
}

/// Request data for REST catalog operations
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct CatalogRequest {
    /// Workspace holding the stores
    #[validate(custom = "validate_name")]
    pub workspace: String,
    /// Catalog user
    #[validate(length(min = 1, message = "user must not be empty"))]
    pub user: String,
    /// Catalog password
    pub passw: String,
    /// Root of the REST catalog, e.g. `https://example.com/geoserver/rest/`
    #[validate(custom = "validate_geo_url")]
    pub geo_url: Url,
}

impl CatalogRequest {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.user.clone(),
            password: self.passw.clone(),
        }
    }
}

/// JSON part of a mosaic publish request
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct PublishData {
    /// Workspace holding the store
    #[validate(custom = "validate_name")]
    pub workspace: String,
    /// Catalog user
    #[validate(length(min = 1, message = "user must not be empty"))]
    pub user: String,
    /// Catalog password
    pub passw: String,
    /// Root of the REST catalog
    #[validate(custom = "validate_geo_url")]
    pub geo_url: Url,
    /// Mosaic store to create or update
    #[validate(custom = "validate_name")]
    pub store: String,
}

impl PublishData {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.user.clone(),
            password: self.passw.clone(),
        }
    }
}

/// Response body wrapper
#[derive(Debug, Serialize)]
pub struct JsonBody<T> {
    pub body: T,
}

impl<T> JsonBody<T> {
    pub fn new(body: T) -> Self {
        JsonBody { body }
    }
}

/// GeoTIFF result of an aggregation and associated metadata.
#[derive(Debug)]
pub struct GeoTiffResponse {
    /// Encoded GeoTIFF
    pub body: Bytes,
    /// Aggregation mode that produced the raster
    pub mode: AggregationMode,
    /// Instants actually aggregated
    pub instants: Vec<TimeInstant>,
}

/// Summary statistic of one region, or `"Null"` when no valid cell remains.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegionValue {
    Mean(f64),
    Null,
}

impl From<Option<f64>> for RegionValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(RegionValue::Null, RegionValue::Mean)
    }
}

impl Serialize for RegionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RegionValue::Mean(value) => serializer.serialize_f64(*value),
            RegionValue::Null => serializer.serialize_str("Null"),
        }
    }
}

/// A (season, store) cell that could not be computed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegionFailure {
    pub season: String,
    pub store: String,
    pub reason: String,
}

/// Region label -> season -> store -> value
pub type RegionTable = BTreeMap<String, BTreeMap<String, BTreeMap<String, RegionValue>>>;

/// Per-region statistics
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct RegionStats {
    pub body: RegionTable,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RegionFailure>,
}

/// State of a mosaic store after a publish
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StoreState {
    /// The store did not exist and was created
    Created,
    /// Granules were harvested into an existing store
    Updated,
}

/// Result of a single publish
#[derive(Debug, PartialEq, Serialize)]
pub struct PublishOutcome {
    pub store: String,
    pub state: StoreState,
}

/// Outcome of one store in a bulk sync
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Created,
    Updated,
    Failed,
}

impl From<StoreState> for SyncStatus {
    fn from(state: StoreState) -> Self {
        match state {
            StoreState::Created => SyncStatus::Created,
            StoreState::Updated => SyncStatus::Updated,
        }
    }
}

/// Result of a bulk sync of the layers root
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub stores: BTreeMap<String, SyncStatus>,
}

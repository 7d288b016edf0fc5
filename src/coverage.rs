//! Retrieval of coverages and boundary features from a remote map-server

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use url::Url;

use crate::error::MosaicistError;
use crate::features::FeatureCollection;
use crate::metrics::COVERAGE_FETCHES;
use crate::models::Credentials;
use crate::resource_manager::ResourceManager;
use crate::types::TimeInstant;

/// Result of a coverage request.
#[derive(Clone, Debug, PartialEq)]
pub enum Coverage {
    /// GeoTIFF bytes of the coverage
    Found(Bytes),
    /// The map-server holds no coverage for the instant
    NotFound,
}

/// Geographic bounding box used to subset a coverage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

/// Coverage source trait.
///
/// Pipelines depend on this trait rather than on a concrete map-server client.
pub trait CoverageSource {
    /// Fetch one coverage at a time instant.
    ///
    /// Returns [Coverage::NotFound] when the map-server holds no data for the instant.
    ///
    /// # Arguments
    ///
    /// * `workspace`: Workspace holding the coverage
    /// * `coverage_id`: Coverage identifier
    /// * `instant`: Time instant to subset
    /// * `credentials`: Optional basic auth credentials
    /// * `clip`: Optional bounding box to subset
    fn fetch_coverage(
        &self,
        workspace: &str,
        coverage_id: &str,
        instant: &TimeInstant,
        credentials: Option<&Credentials>,
        clip: Option<&BoundingBox>,
    ) -> impl Future<Output = Result<Coverage, MosaicistError>> + Send;

    /// Fetch a vector boundary layer as GeoJSON features.
    ///
    /// # Arguments
    ///
    /// * `workspace`: Workspace holding the layer
    /// * `type_name`: Layer name
    /// * `max_features`: Optional cap on the number of features
    /// * `credentials`: Optional basic auth credentials
    fn fetch_features(
        &self,
        workspace: &str,
        type_name: &str,
        max_features: Option<u32>,
        credentials: Option<&Credentials>,
    ) -> impl Future<Output = Result<FeatureCollection, MosaicistError>> + Send;
}

/// GeoServer OWS client.
///
/// Implements [CoverageSource] with WCS 2.0.1 and WFS 1.0.0 requests against
/// `{base_url}{workspace}/ows`.
#[derive(Debug)]
pub struct GeoServerOws {
    client: reqwest::Client,
    base_url: Url,
    resource_manager: Arc<ResourceManager>,
}

impl GeoServerOws {
    /// Create a new OWS client.
    ///
    /// # Arguments
    ///
    /// * `client`: Shared reqwest client
    /// * `base_url`: GeoServer root URL, e.g. `https://example.com/geoserver/`
    /// * `resource_manager`: ResourceManager object limiting outbound connections
    pub fn new(client: reqwest::Client, base_url: &Url, resource_manager: Arc<ResourceManager>) -> Self {
        Self {
            client,
            base_url: with_trailing_slash(base_url),
            resource_manager,
        }
    }

    /// URL of the OWS endpoint of a workspace.
    fn ows_url(&self, workspace: &str) -> Result<Url, MosaicistError> {
        Ok(self.base_url.join(&format!("{}/ows", workspace))?)
    }

    /// WCS GetCoverage URL.
    pub fn coverage_url(
        &self,
        workspace: &str,
        coverage_id: &str,
        instant: &TimeInstant,
        clip: Option<&BoundingBox>,
    ) -> Result<Url, MosaicistError> {
        let mut url = self.ows_url(workspace)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("service", "WCS")
                .append_pair("request", "GetCoverage")
                .append_pair("version", "2.0.1")
                .append_pair("coverageId", coverage_id)
                .append_pair("format", "image/geotiff")
                .append_pair("subset", &format!("Time(\"{}\")", instant.to_iso8601()?));
            if let Some(clip) = clip {
                query
                    .append_pair("subset", &format!("Long({},{})", clip.min_x, clip.max_x))
                    .append_pair("subset", &format!("Lat({},{})", clip.min_y, clip.max_y));
            }
        }
        Ok(url)
    }

    /// WFS GetFeature URL.
    pub fn features_url(
        &self,
        workspace: &str,
        type_name: &str,
        max_features: Option<u32>,
    ) -> Result<Url, MosaicistError> {
        let mut url = self.ows_url(workspace)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("service", "WFS")
                .append_pair("version", "1.0.0")
                .append_pair("request", "GetFeature")
                .append_pair("typeName", &format!("{}:{}", workspace, type_name))
                .append_pair("outputFormat", "application/json");
            if let Some(max_features) = max_features {
                query.append_pair("maxFeatures", &max_features.to_string());
            }
        }
        Ok(url)
    }

    fn get(&self, url: Url, credentials: Option<&Credentials>) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.username, Some(&credentials.password))
            }
            None => request,
        }
    }
}

impl CoverageSource for GeoServerOws {
    #[tracing::instrument(level = "DEBUG", skip(self, credentials, clip))]
    async fn fetch_coverage(
        &self,
        workspace: &str,
        coverage_id: &str,
        instant: &TimeInstant,
        credentials: Option<&Credentials>,
        clip: Option<&BoundingBox>,
    ) -> Result<Coverage, MosaicistError> {
        let url = self.coverage_url(workspace, coverage_id, instant, clip)?;
        // Acquire connection permit to be freed via drop when this function returns
        let _conn_permits = self.resource_manager.connection().await?;
        let result = async {
            let response = self.get(url.clone(), credentials).send().await?;
            match response.status() {
                reqwest::StatusCode::NOT_FOUND => Ok(Coverage::NotFound),
                status if status.is_success() => Ok(Coverage::Found(response.bytes().await?)),
                status => Err(MosaicistError::Fetch {
                    url: url.to_string(),
                    status,
                }),
            }
        }
        .await;
        let outcome = match &result {
            Ok(Coverage::Found(_)) => "found",
            Ok(Coverage::NotFound) => "not_found",
            Err(_) => "error",
        };
        COVERAGE_FETCHES.with_label_values(&[outcome]).inc();
        result
    }

    #[tracing::instrument(level = "DEBUG", skip(self, credentials))]
    async fn fetch_features(
        &self,
        workspace: &str,
        type_name: &str,
        max_features: Option<u32>,
        credentials: Option<&Credentials>,
    ) -> Result<FeatureCollection, MosaicistError> {
        let url = self.features_url(workspace, type_name, max_features)?;
        // Acquire connection permit to be freed via drop when this function returns
        let _conn_permits = self.resource_manager.connection().await?;
        let response = self.get(url.clone(), credentials).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MosaicistError::Fetch {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Return a copy of `url` whose path ends with a slash, so that relative joins append to it.
pub fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

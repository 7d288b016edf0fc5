//! GeoServer REST catalog client

use std::future::Future;
use std::path::Path;

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::coverage::with_trailing_slash;
use crate::error::MosaicistError;
use crate::models::Credentials;

/// A coverage store known to the catalog.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct StoreInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Time dimension settings of a coverage.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionInfo {
    pub enabled: bool,
    pub presentation: String,
    pub units: String,
}

impl DimensionInfo {
    /// Enabled time dimension listing every ISO 8601 instant.
    pub fn time_list() -> Self {
        DimensionInfo {
            enabled: true,
            presentation: "LIST".to_string(),
            units: "ISO8601".to_string(),
        }
    }
}

/// The subset of a coverage resource managed by the publisher.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoverageResource {
    pub name: String,
    pub supported_formats: Vec<String>,
    pub time: Option<DimensionInfo>,
    pub dir_name: Option<String>,
}

/// REST catalog trait.
///
/// The publisher depends on this trait rather than on a concrete catalog client.
pub trait Catalog {
    /// Whether the workspace exists.
    fn workspace_exists(
        &self,
        workspace: &str,
    ) -> impl Future<Output = Result<bool, MosaicistError>> + Send;

    /// Look up a coverage store. Returns `None` if it does not exist.
    fn get_store(
        &self,
        workspace: &str,
        store: &str,
    ) -> impl Future<Output = Result<Option<StoreInfo>, MosaicistError>> + Send;

    /// Names of the coverage stores in a workspace.
    fn list_stores(
        &self,
        workspace: &str,
    ) -> impl Future<Output = Result<Vec<String>, MosaicistError>> + Send;

    /// Create an image mosaic store from a zip archive.
    fn create_image_mosaic(
        &self,
        workspace: &str,
        store: &str,
        archive: &Path,
    ) -> impl Future<Output = Result<(), MosaicistError>> + Send;

    /// Read a coverage resource.
    fn get_coverage(
        &self,
        workspace: &str,
        store: &str,
        coverage: &str,
    ) -> impl Future<Output = Result<CoverageResource, MosaicistError>> + Send;

    /// Save a coverage resource.
    fn save_coverage(
        &self,
        workspace: &str,
        store: &str,
        coverage: &CoverageResource,
    ) -> impl Future<Output = Result<(), MosaicistError>> + Send;

    /// Delete a coverage store together with its coverages.
    fn delete_store(
        &self,
        workspace: &str,
        store: &str,
    ) -> impl Future<Output = Result<(), MosaicistError>> + Send;

    /// Harvest the granules of a zip archive into an existing image mosaic store.
    fn harvest_granules(
        &self,
        workspace: &str,
        store: &str,
        archive: &Path,
    ) -> impl Future<Output = Result<(), MosaicistError>> + Send;
}

#[derive(Deserialize)]
struct StoreBody {
    #[serde(rename = "coverageStore")]
    coverage_store: StoreInfo,
}

#[derive(Deserialize)]
struct StoreListBody {
    #[serde(rename = "coverageStores")]
    coverage_stores: StoreListEntries,
}

// An empty store list is rendered as an empty string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoreListEntries {
    Populated {
        #[serde(rename = "coverageStore", default)]
        coverage_store: Vec<StoreInfo>,
    },
    Empty(String),
}

#[derive(Deserialize)]
struct CoverageBody {
    coverage: CoverageFields,
}

#[derive(Deserialize)]
struct CoverageFields {
    name: String,
    #[serde(rename = "supportedFormats", default)]
    supported_formats: Option<StringList>,
}

#[derive(Deserialize)]
struct StringList {
    #[serde(default)]
    string: Vec<String>,
}

/// GeoServer REST catalog client.
///
/// Implements [Catalog] against a REST root such as `https://example.com/geoserver/rest/`.
#[derive(Debug)]
pub struct GeoServerCatalog {
    client: reqwest::Client,
    rest_url: Url,
    credentials: Credentials,
}

impl GeoServerCatalog {
    /// Create a new catalog client.
    ///
    /// # Arguments
    ///
    /// * `client`: Shared reqwest client
    /// * `rest_url`: Root of the REST API
    /// * `credentials`: Basic auth credentials
    pub fn new(client: reqwest::Client, rest_url: &Url, credentials: Credentials) -> Self {
        Self {
            client,
            rest_url: with_trailing_slash(rest_url),
            credentials,
        }
    }

    /// REST root, always ending with a slash.
    pub fn rest_url(&self) -> &Url {
        &self.rest_url
    }

    /// Build a URL relative to the REST root.
    pub fn url(&self, path: &str) -> Result<Url, MosaicistError> {
        Ok(self.rest_url.join(path)?)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    /// Send a request, returning `None` on 404 and failing on any other non-success status.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<Option<reqwest::Response>, MosaicistError> {
        let response = request.send().await?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(MosaicistError::Fetch {
                url: url.to_string(),
                status,
            }),
        }
    }

    /// Send a request, treating 404 as a failure.
    async fn send_expecting(
        &self,
        request: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, MosaicistError> {
        self.send(request, url)
            .await?
            .ok_or_else(|| MosaicistError::Fetch {
                url: url.to_string(),
                status: reqwest::StatusCode::NOT_FOUND,
            })
    }

    async fn upload_archive(
        &self,
        method: reqwest::Method,
        url: Url,
        archive: &Path,
    ) -> Result<(), MosaicistError> {
        let body = tokio::fs::read(archive).await?;
        let request = self
            .request(method, url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(body);
        self.send_expecting(request, &url).await?;
        Ok(())
    }
}

/// JSON body of a coverage update.
pub fn coverage_body(coverage: &CoverageResource) -> serde_json::Value {
    let mut entries = vec![];
    if let Some(time) = &coverage.time {
        entries.push(json!({
            "@key": "time",
            "dimensionInfo": {
                "enabled": time.enabled,
                "presentation": time.presentation,
                "units": time.units,
            }
        }));
    }
    if let Some(dir_name) = &coverage.dir_name {
        entries.push(json!({"@key": "dirName", "$": dir_name}));
    }
    json!({
        "coverage": {
            "name": coverage.name,
            "enabled": true,
            "supportedFormats": {"string": coverage.supported_formats},
            "metadata": {"entry": entries},
        }
    })
}

impl Catalog for GeoServerCatalog {
    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn workspace_exists(&self, workspace: &str) -> Result<bool, MosaicistError> {
        let url = self.url(&format!("workspaces/{}.json", workspace))?;
        let request = self.request(reqwest::Method::GET, url.clone());
        Ok(self.send(request, &url).await?.is_some())
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn get_store(
        &self,
        workspace: &str,
        store: &str,
    ) -> Result<Option<StoreInfo>, MosaicistError> {
        let url = self.url(&format!(
            "workspaces/{}/coveragestores/{}.json",
            workspace, store
        ))?;
        let request = self.request(reqwest::Method::GET, url.clone());
        match self.send(request, &url).await? {
            Some(response) => {
                let body: StoreBody = serde_json::from_slice(&response.bytes().await?)?;
                Ok(Some(body.coverage_store))
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn list_stores(&self, workspace: &str) -> Result<Vec<String>, MosaicistError> {
        let url = self.url(&format!("workspaces/{}/coveragestores.json", workspace))?;
        let request = self.request(reqwest::Method::GET, url.clone());
        let response = self.send_expecting(request, &url).await?;
        let body: StoreListBody = serde_json::from_slice(&response.bytes().await?)?;
        Ok(match body.coverage_stores {
            StoreListEntries::Populated { coverage_store } => {
                coverage_store.into_iter().map(|store| store.name).collect()
            }
            StoreListEntries::Empty(_) => vec![],
        })
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn create_image_mosaic(
        &self,
        workspace: &str,
        store: &str,
        archive: &Path,
    ) -> Result<(), MosaicistError> {
        let mut url = self.url(&format!(
            "workspaces/{}/coveragestores/{}/file.imagemosaic",
            workspace, store
        ))?;
        url.query_pairs_mut().append_pair("configure", "all");
        self.upload_archive(reqwest::Method::PUT, url, archive).await
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn get_coverage(
        &self,
        workspace: &str,
        store: &str,
        coverage: &str,
    ) -> Result<CoverageResource, MosaicistError> {
        let url = self.url(&format!(
            "workspaces/{}/coveragestores/{}/coverages/{}.json",
            workspace, store, coverage
        ))?;
        let request = self.request(reqwest::Method::GET, url.clone());
        let response = self.send_expecting(request, &url).await?;
        let body: CoverageBody = serde_json::from_slice(&response.bytes().await?)?;
        Ok(CoverageResource {
            name: body.coverage.name,
            supported_formats: body
                .coverage
                .supported_formats
                .map(|formats| formats.string)
                .unwrap_or_default(),
            ..Default::default()
        })
    }

    #[tracing::instrument(level = "DEBUG", skip(self, coverage), fields(coverage = %coverage.name))]
    async fn save_coverage(
        &self,
        workspace: &str,
        store: &str,
        coverage: &CoverageResource,
    ) -> Result<(), MosaicistError> {
        let url = self.url(&format!(
            "workspaces/{}/coveragestores/{}/coverages/{}.json",
            workspace, store, coverage.name
        ))?;
        let request = self
            .request(reqwest::Method::PUT, url.clone())
            .json(&coverage_body(coverage));
        self.send_expecting(request, &url).await?;
        Ok(())
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn delete_store(&self, workspace: &str, store: &str) -> Result<(), MosaicistError> {
        let mut url = self.url(&format!(
            "workspaces/{}/coveragestores/{}",
            workspace, store
        ))?;
        url.query_pairs_mut().append_pair("recurse", "true");
        let request = self.request(reqwest::Method::DELETE, url.clone());
        // Already gone.
        self.send(request, &url).await?;
        Ok(())
    }

    #[tracing::instrument(level = "DEBUG", skip(self))]
    async fn harvest_granules(
        &self,
        workspace: &str,
        store: &str,
        archive: &Path,
    ) -> Result<(), MosaicistError> {
        let url = self.url(&format!(
            "workspaces/{}/coveragestores/{}/file.imagemosaic",
            workspace, store
        ))?;
        self.upload_archive(reqwest::Method::POST, url, archive).await
    }
}

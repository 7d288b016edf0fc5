use crate::catalog::GeoServerCatalog;
use crate::cli::CommandLineArgs;
use crate::coverage::GeoServerOws;
use crate::models::Credentials;
use crate::mosaic::MosaicLayout;
use crate::publisher::PublishLocks;
use crate::resource_manager::ResourceManager;

use std::sync::Arc;

use url::Url;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: Arc<ResourceManager>,

    /// OWS client of the configured map-server.
    pub ows: GeoServerOws,

    /// HTTP client shared by the REST catalog clients.
    pub http_client: reqwest::Client,

    /// Per-store publish locks.
    pub publish_locks: PublishLocks,

    // Filesystem roots.
    pub layout: MosaicLayout,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Self {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = Arc::new(ResourceManager::new(
            args.connection_limit,
            task_limit,
            args.use_rayon,
        ));
        let http_client = reqwest::Client::new();
        let ows = GeoServerOws::new(
            http_client.clone(),
            &args.ows_url,
            resource_manager.clone(),
        );

        Self {
            args: args.clone(),
            resource_manager,
            ows,
            http_client,
            publish_locks: PublishLocks::new(),
            layout: MosaicLayout::new(args),
        }
    }

    /// REST catalog client for a caller-supplied catalog URL and credentials.
    pub fn catalog(&self, geo_url: &Url, credentials: Credentials) -> GeoServerCatalog {
        GeoServerCatalog::new(self.http_client.clone(), geo_url, credentials)
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;

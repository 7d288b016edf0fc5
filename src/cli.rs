//! Command Line Interface (CLI) arguments.

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Mosaicist command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "MOSAICIST_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "MOSAICIST_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "MOSAICIST_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/mosaicist/certs/cert.pem",
        env = "MOSAICIST_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/mosaicist/certs/key.pem",
        env = "MOSAICIST_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "MOSAICIST_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to enable sending traces to Jaeger.
    #[arg(long, default_value_t = false, env = "MOSAICIST_ENABLE_JAEGER")]
    pub enable_jaeger: bool,
    /// Whether to use Rayon for execution of CPU-bound tasks.
    #[arg(long, default_value_t = false, env = "MOSAICIST_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum number of simultaneous outbound connections to the map-server
    #[arg(long, env = "MOSAICIST_CONNECTION_LIMIT")]
    pub connection_limit: Option<usize>,
    /// Maximum number of threads to use for CPU-bound tasks. Defaults to one less than the
    /// number of CPUs.
    #[arg(long, env = "MOSAICIST_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Root URL of the map-server OWS services
    #[arg(
        long,
        default_value = "https://geo.aclimate.org/geoserver/",
        env = "MOSAICIST_OWS_URL"
    )]
    pub ows_url: Url,
    /// Workspace holding the monthly series
    #[arg(
        long,
        default_value = "historical_climate_hn",
        env = "MOSAICIST_HISTORICAL_WORKSPACE"
    )]
    pub historical_workspace: String,
    /// Workspace holding the climatology baseline
    #[arg(
        long,
        default_value = "climatology_hn",
        env = "MOSAICIST_CLIMATOLOGY_WORKSPACE"
    )]
    pub climatology_workspace: String,
    /// Coverage fetched when a request names none
    #[arg(long, default_value = "PREC", env = "MOSAICIST_COVERAGE_ID")]
    pub coverage_id: String,
    /// Reference year of the climatology baseline
    #[arg(long, default_value_t = 2000, env = "MOSAICIST_CLIMATOLOGY_YEAR")]
    pub climatology_year: i32,
    /// Directory holding one subdirectory of raster tiles per mosaic store
    #[arg(long, default_value = "./layers", env = "MOSAICIST_LAYERS_ROOT")]
    pub layers_root: PathBuf,
    /// Directory holding the two mosaic descriptor files
    #[arg(long, default_value = "./properties", env = "MOSAICIST_PROPERTIES_ROOT")]
    pub properties_root: PathBuf,
    /// Directory under which per-request staging directories are created
    #[arg(long, default_value = "./staging", env = "MOSAICIST_STAGING_ROOT")]
    pub staging_root: PathBuf,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CommandLineArgs::parse_from(["mosaicist"]);
        assert_eq!(8080, args.port);
        assert_eq!("PREC", args.coverage_id);
        assert_eq!(2000, args.climatology_year);
        assert_eq!(None, args.connection_limit);
        assert_eq!("https://geo.aclimate.org/geoserver/", args.ows_url.as_str());
    }

    #[test]
    fn overrides() {
        let args = CommandLineArgs::parse_from([
            "mosaicist",
            "--port",
            "9000",
            "--use-rayon",
            "--connection-limit",
            "4",
            "--ows-url",
            "http://localhost:8600/geoserver",
            "--layers-root",
            "/data/layers",
        ]);
        assert_eq!(9000, args.port);
        assert!(args.use_rayon);
        assert_eq!(Some(4), args.connection_limit);
        assert_eq!("http://localhost:8600/geoserver", args.ows_url.as_str());
        assert_eq!(PathBuf::from("/data/layers"), args.layers_root);
    }
}

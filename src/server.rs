//! Web server

use crate::cli;

use std::{
    net::{AddrParseError, SocketAddr},
    path::PathBuf,
    process::exit,
    str::FromStr,
    time::Duration,
};

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;

/// Socket address to listen on.
pub fn listen_addr(args: &cli::CommandLineArgs) -> Result<SocketAddr, AddrParseError> {
    SocketAddr::from_str(&format!("{}:{}", args.host, args.port))
}

/// Absolute path of a TLS file, expanding a leading `~`.
fn tls_file(path: &str) -> std::io::Result<PathBuf> {
    expanduser(path)?.canonicalize()
}

fn tls_file_or_exit(path: &str, kind: &str) -> PathBuf {
    tls_file(path).unwrap_or_else(|error| {
        tracing::error!(%path, %error, "TLS {} file not found", kind);
        exit(1)
    })
}

/// Load the certificate and key, exiting if either is missing.
async fn tls_config(args: &cli::CommandLineArgs) -> RustlsConfig {
    let cert_file = tls_file_or_exit(&args.cert_file, "certificate");
    let key_file = tls_file_or_exit(&args.key_file, "key");
    RustlsConfig::from_pem_file(cert_file, key_file)
        .await
        .expect("Failed to load TLS certificate files")
}

/// Serve the Mosaicist service
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `service`: The [crate::app::Service] to serve
pub async fn serve(args: &cli::CommandLineArgs, service: crate::app::Service) {
    let addr = listen_addr(args).expect("invalid host name, IP address or port number");

    // Catch ctrl+c and try to shutdown gracefully
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(
        handle.clone(),
        args.graceful_shutdown_timeout,
    ));

    tracing::info!(%addr, https = args.https, ows_url = %args.ows_url, "listening");
    if args.https {
        axum_server::bind_rustls(addr, tls_config(args).await)
            .handle(handle)
            .serve(service.into_make_service())
            .await
            .expect("HTTPS server failed");
    } else {
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await
            .expect("HTTP server failed");
    }
}

/// Graceful shutdown handler
///
/// Installs signal handlers to catch Ctrl-C or SIGTERM and trigger a graceful shutdown.
async fn shutdown_signal(handle: Handle, timeout: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(timeout, "signal received, starting graceful shutdown");
    // Force shutdown if graceful shutdown takes longer than the timeout
    handle.graceful_shutdown(Some(Duration::from_secs(timeout)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    #[test]
    fn listen_addr_default() {
        let addr = listen_addr(&test_utils::get_test_args()).unwrap();
        assert_eq!("0.0.0.0:8080", addr.to_string());
    }

    #[test]
    fn listen_addr_invalid_host() {
        let mut args = test_utils::get_test_args();
        args.host = "geo.example.com".to_string();
        assert!(listen_addr(&args).is_err());
    }

    #[test]
    fn tls_file_present() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        assert_eq!(file.path().canonicalize().unwrap(), tls_file(path).unwrap());
    }

    #[test]
    fn tls_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        assert!(tls_file(path.to_str().unwrap()).is_err());
    }
}

//! This file defines the mosaicist binary entry point.

use mosaicist::app;
use mosaicist::cli;
use mosaicist::metrics;
use mosaicist::server;
use mosaicist::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    ::tracing::debug!(?args, "parsed command line arguments");
    metrics::register_metrics();
    app::init(&args);
    let service = app::service(&args);
    server::serve(&args, service).await;
    tracing::shutdown_tracing();
}

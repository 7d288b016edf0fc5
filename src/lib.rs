//! This crate provides Mosaicist, a web service for monthly climate rasters held on a GeoServer
//! map-server. It implements two pipelines:
//!
//! * Aggregation: fetch a monthly series of coverages over WCS, average it, optionally compare it
//!   with a climatology baseline (difference or percent anomaly), and return the result as a
//!   GeoTIFF. Region statistics summarise mosaics over administrative boundaries fetched over WFS.
//! * Publishing: package raster tiles and the image mosaic descriptors into an archive and create
//!   or update a time-enabled image mosaic store through the GeoServer REST API.
//!
//! Mosaicist is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data.
//! * [reqwest] talks to the map-server.
//! * [ndarray] holds raster cells, [tiff] reads and writes GeoTIFF files and [geo] clips rasters
//!   to region boundaries.
//! * [zip] packages image mosaic archives.

pub mod app;
pub mod app_state;
pub mod catalog;
pub mod cli;
pub mod coverage;
pub mod error;
pub mod features;
pub mod geotiff;
pub mod metrics;
pub mod models;
pub mod mosaic;
pub mod operation;
pub mod operations;
pub mod pipeline;
pub mod publisher;
pub mod raster;
pub mod region_stats;
pub mod resource_manager;
pub mod server;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod validated_json;

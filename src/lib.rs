//! mangroves: geodesic embedding patch extraction
//!
//! Turns a `(latitude, longitude, year)` query into a fixed-shape
//! `(64, span, span)` array sampled from the annual satellite embedding
//! collection, ready for machine-learning consumption.

pub mod types;
pub mod io;
pub mod core;
pub mod config;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, DateRange, EmbedError, EmbedResult, GeoPoint, PatchCube, RemoteImageHandle,
};

pub use crate::core::{
    compute_region, BatchExtractor, BatchParams, CornerRadius, EmbeddingPatch, ExtractionOptions,
    PatchExtractor, PatchRequest, Region, RegionGeometry, RegionParams,
};
pub use io::{
    CancellationToken, CollectionGateway, EarthEngineConfig, EarthEngineSource, EmbeddingSource,
    PatchRecord, RetryPolicy,
};
pub use config::ExtractionConfig;

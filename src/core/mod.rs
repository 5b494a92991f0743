//! Region geometry, patch normalization and extraction

pub mod geometry;
pub mod normalize;
pub mod extractor;
pub mod batch;

// Re-export main types
pub use geometry::{
    compute_region, destination_point, geodesic_circle, haversine_distance, planar_circle,
    CardinalPoints, CornerRadius, Region, RegionGeometry, RegionParams,
};
pub use normalize::{
    band_name, canonical_band_names, center_crop, flip_vertical, pad_symmetric, reconcile_shape,
    stack_bands, StackedBands,
};
pub use extractor::{validate_year, EmbeddingPatch, ExtractionOptions, PatchExtractor};
pub use batch::{BatchExtractor, BatchOutcome, BatchParams, BatchStatus, PatchRequest};

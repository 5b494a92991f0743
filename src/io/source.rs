use crate::types::{BoundingBox, DateRange, EmbedResult, ImageProperties, RawSample, RemoteImageHandle};
use std::sync::Arc;

/// Remote provider of annual embedding images.
///
/// Implementations talk to the actual service; the gateway and extractor only
/// depend on these three calls.
pub trait EmbeddingSource {
    /// Images intersecting `bounds` acquired within `window`, in the source's default order
    fn query_images(&self, bounds: &BoundingBox, window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>>;

    /// Sample `image` over `bounds`, one row-major raster per band in `band_filter`.
    /// Masked pixels take `default_value`.
    fn sample_rectangle(
        &self,
        image: &RemoteImageHandle,
        bounds: &BoundingBox,
        default_value: f64,
        band_filter: &[String],
    ) -> EmbedResult<RawSample>;

    /// Image metadata, used for availability diagnostics
    fn get_properties(&self, image: &RemoteImageHandle) -> EmbedResult<ImageProperties>;
}

impl<S: EmbeddingSource + ?Sized> EmbeddingSource for &S {
    fn query_images(&self, bounds: &BoundingBox, window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>> {
        (**self).query_images(bounds, window)
    }

    fn sample_rectangle(
        &self,
        image: &RemoteImageHandle,
        bounds: &BoundingBox,
        default_value: f64,
        band_filter: &[String],
    ) -> EmbedResult<RawSample> {
        (**self).sample_rectangle(image, bounds, default_value, band_filter)
    }

    fn get_properties(&self, image: &RemoteImageHandle) -> EmbedResult<ImageProperties> {
        (**self).get_properties(image)
    }
}

impl<S: EmbeddingSource + ?Sized> EmbeddingSource for Arc<S> {
    fn query_images(&self, bounds: &BoundingBox, window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>> {
        (**self).query_images(bounds, window)
    }

    fn sample_rectangle(
        &self,
        image: &RemoteImageHandle,
        bounds: &BoundingBox,
        default_value: f64,
        band_filter: &[String],
    ) -> EmbedResult<RawSample> {
        (**self).sample_rectangle(image, bounds, default_value, band_filter)
    }

    fn get_properties(&self, image: &RemoteImageHandle) -> EmbedResult<ImageProperties> {
        (**self).get_properties(image)
    }
}

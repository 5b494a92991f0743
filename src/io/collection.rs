use crate::core::geometry::Region;
use crate::core::normalize::canonical_band_names;
use crate::io::retry::{CallContext, RetryPolicy};
use crate::io::source::EmbeddingSource;
use crate::types::{DateRange, EmbedError, EmbedResult, RawSample, RemoteImageHandle};

/// Value substituted for masked pixels when sampling
pub const SAMPLE_DEFAULT_VALUE: f64 = 0.0;

/// Annual embedding collection lookups for a region and year
pub struct CollectionGateway<S> {
    source: S,
    retry: RetryPolicy,
}

impl<S: EmbeddingSource> CollectionGateway<S> {
    /// Create a gateway with the default retry policy
    pub fn new(source: S) -> Self {
        Self {
            source,
            retry: RetryPolicy::default(),
        }
    }

    /// Create a gateway with a custom retry policy
    pub fn with_retry(source: S, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// First image of `year` intersecting the region, or `None` when there is no coverage
    pub fn find_image(&self, region: &Region, year: i32) -> EmbedResult<Option<RemoteImageHandle>> {
        self.find_image_with(region, year, &CallContext::unbounded())
    }

    /// [`find_image`](Self::find_image) under a cancellation/deadline context
    pub fn find_image_with(
        &self,
        region: &Region,
        year: i32,
        ctx: &CallContext,
    ) -> EmbedResult<Option<RemoteImageHandle>> {
        queryable(region)?;
        let window = DateRange::for_year(year)?;
        let images = self
            .retry
            .run("Image lookup", ctx, |_| self.source.query_images(region.bounds(), &window))
            .map_err(|e| {
                log::error!("Image lookup for {} in {} failed: {}", region.center(), year, e);
                e
            })?;

        log::info!("Filtered images for {}: {}", year, images.len());
        Ok(images.into_iter().next())
    }

    /// Sample all canonical bands of `image` over the region
    pub fn sample(&self, image: &RemoteImageHandle, region: &Region, ctx: &CallContext) -> EmbedResult<RawSample> {
        queryable(region)?;
        let bands = canonical_band_names();
        self.retry.run("Rectangle sample", ctx, |attempt| {
            log::debug!("Sampling {} (attempt {})", image.id, attempt);
            self.source
                .sample_rectangle(image, region.bounds(), SAMPLE_DEFAULT_VALUE, &bands)
        })
    }

    /// Whether embedding data exists for the region and year. Errors are logged and reported as `false`.
    pub fn is_available(&self, region: &Region, year: i32) -> bool {
        let image = match self.find_image(region, year) {
            Ok(Some(image)) => image,
            Ok(None) => {
                log::warn!("No embedding data found for {} in {}", region.center(), year);
                return false;
            }
            Err(e) => {
                log::error!("An error occurred during the availability check: {}", e);
                return false;
            }
        };

        let ctx = CallContext::unbounded();
        match self
            .retry
            .run("Image properties", &ctx, |_| self.source.get_properties(&image))
        {
            Ok(properties) => {
                log::info!(
                    "Image properties: {:?}",
                    properties.keys().collect::<Vec<_>>()
                );
                if let Some(bands) = properties.get("bands").and_then(|b| b.as_array()) {
                    let band_ids: Vec<&str> = bands
                        .iter()
                        .filter_map(|band| band.get("id").and_then(|id| id.as_str()))
                        .take(10)
                        .collect();
                    log::info!("Available bands: {:?}... (showing first 10)", band_ids);
                }
                true
            }
            Err(e) => {
                log::error!("An error occurred during the availability check: {}", e);
                false
            }
        }
    }
}

/// Refuse regions whose rectangle cannot be expressed as one min/max box
fn queryable(region: &Region) -> EmbedResult<()> {
    if region.crosses_antimeridian() {
        return Err(EmbedError::InvalidRegion(format!(
            "Region around {} crosses the antimeridian",
            region.center()
        )));
    }
    Ok(())
}

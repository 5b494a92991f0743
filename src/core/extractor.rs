use crate::core::geometry::Region;
use crate::core::normalize::{canonical_band_names, normalize_sample};
use crate::io::collection::CollectionGateway;
use crate::io::retry::{CallContext, CancellationToken};
use crate::io::source::EmbeddingSource;
use crate::types::{EmbedError, EmbedResult, GeoPoint, PatchCube, FIRST_EMBEDDING_YEAR, NUM_BANDS};
use chrono::{Datelike, Utc};
use ndarray::{ArrayView2, Axis};
use std::time::Duration;

/// Fixed-shape embedding patch for one region and year
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingPatch {
    data: PatchCube,
    bands: Vec<String>,
    region: Region,
    year: i32,
    bands_found: usize,
}

impl EmbeddingPatch {
    /// Assemble a patch, checking the cube shape against the region
    pub fn new(data: PatchCube, region: Region, year: i32, bands_found: usize) -> EmbedResult<Self> {
        let span = region.requested_span();
        if data.dim() != (NUM_BANDS, span, span) {
            return Err(EmbedError::Extraction(format!(
                "Patch has shape {:?}, expected ({}, {}, {})",
                data.dim(),
                NUM_BANDS,
                span,
                span
            )));
        }
        if bands_found == 0 || bands_found > NUM_BANDS {
            return Err(EmbedError::Extraction(format!(
                "Patch must contain between 1 and {} sampled bands, got {}",
                NUM_BANDS, bands_found
            )));
        }

        Ok(Self {
            data,
            bands: canonical_band_names(),
            region,
            year,
            bands_found,
        })
    }

    /// `(64, span, span)` array in canonical band order, north-up rows
    pub fn data(&self) -> &PatchCube {
        &self.data
    }

    pub fn into_data(self) -> PatchCube {
        self.data
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// Raster of band `index`
    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f32>> {
        (index < NUM_BANDS).then(|| self.data.index_axis(Axis(0), index))
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn center(&self) -> GeoPoint {
        self.region.center()
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn resolution_m(&self) -> f64 {
        self.region.resolution_m()
    }

    /// Edge length of the patch in pixels
    pub fn pixel_span(&self) -> usize {
        self.region.requested_span()
    }

    pub fn bands_found(&self) -> usize {
        self.bands_found
    }

    pub fn bands_filled(&self) -> usize {
        NUM_BANDS - self.bands_found
    }
}

/// Per-extraction cancellation and time limit
#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    /// Checked before every remote call and between retries
    pub cancel: CancellationToken,
    /// Wall-clock budget for one extraction, all retries included
    pub timeout: Option<Duration>,
}

impl ExtractionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    fn context(&self) -> CallContext {
        CallContext::new(self.cancel.clone(), self.timeout)
    }
}

/// Reject years the annual collection cannot cover
pub fn validate_year(year: i32) -> EmbedResult<()> {
    let current = Utc::now().year();
    if year < FIRST_EMBEDDING_YEAR || year > current {
        log::error!(
            "Invalid year: {}. Must be between {} and {}.",
            year,
            FIRST_EMBEDDING_YEAR,
            current
        );
        return Err(EmbedError::InvalidYear {
            year,
            min: FIRST_EMBEDDING_YEAR,
            max: current,
        });
    }
    Ok(())
}

/// Extracts fixed-shape embedding patches through a collection gateway
pub struct PatchExtractor<S> {
    gateway: CollectionGateway<S>,
    options: ExtractionOptions,
}

impl<S: EmbeddingSource> PatchExtractor<S> {
    /// Create an extractor without cancellation or timeout
    pub fn new(gateway: CollectionGateway<S>) -> Self {
        Self {
            gateway,
            options: ExtractionOptions::default(),
        }
    }

    /// Create an extractor with custom options
    pub fn with_options(gateway: CollectionGateway<S>, options: ExtractionOptions) -> Self {
        Self { gateway, options }
    }

    pub fn gateway(&self) -> &CollectionGateway<S> {
        &self.gateway
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Extract the patch for `region` in `year`.
    ///
    /// Returns `None` when there is no coverage or when anything goes wrong;
    /// failures are logged with the point and year and never propagate.
    pub fn extract(&self, region: &Region, year: i32) -> Option<EmbeddingPatch> {
        match self.try_extract(region, year) {
            Ok(patch) => patch,
            Err(e) => {
                log::error!(
                    "Error extracting patch for {} in year {}: {}",
                    region.center(),
                    year,
                    e
                );
                None
            }
        }
    }

    /// Same pipeline as [`extract`](Self::extract), keeping "no coverage" (`Ok(None)`)
    /// apart from failures (`Err`)
    pub fn try_extract(&self, region: &Region, year: i32) -> EmbedResult<Option<EmbeddingPatch>> {
        let ctx = self.options.context();

        let image = match self.gateway.find_image_with(region, year, &ctx)? {
            Some(image) => image,
            None => {
                log::warn!("No image found for {} in year {}", region.center(), year);
                return Ok(None);
            }
        };

        let raw = self.gateway.sample(&image, region, &ctx)?;
        if raw.is_empty() {
            return Err(EmbedError::Extraction(format!(
                "No data found for point {} in year {}",
                region.center(),
                year
            )));
        }

        let stacked = normalize_sample(&raw, region.requested_span()).map_err(|e| {
            EmbedError::Extraction(format!(
                "No embedding bands found for point {} in year {}: {}",
                region.center(),
                year,
                e
            ))
        })?;

        log::info!(
            "Successfully extracted {} bands ({} zero-filled)",
            stacked.found,
            stacked.filled
        );

        let patch = EmbeddingPatch::new(stacked.cube, region.clone(), year, stacked.found)?;
        log::info!("Successfully created patch with shape: {:?}", patch.data().dim());
        Ok(Some(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::compute_region;
    use crate::core::normalize::band_name;
    use crate::io::retry::RetryPolicy;
    use crate::types::{BoundingBox, DateRange, ImageProperties, RawSample, RemoteImageHandle};

    struct FixedSource {
        image: Option<RemoteImageHandle>,
        sample: RawSample,
    }

    impl EmbeddingSource for FixedSource {
        fn query_images(&self, _bounds: &BoundingBox, _window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>> {
            Ok(self.image.iter().cloned().collect())
        }

        fn sample_rectangle(
            &self,
            _image: &RemoteImageHandle,
            _bounds: &BoundingBox,
            _default_value: f64,
            _band_filter: &[String],
        ) -> EmbedResult<RawSample> {
            Ok(self.sample.clone())
        }

        fn get_properties(&self, _image: &RemoteImageHandle) -> EmbedResult<ImageProperties> {
            Ok(ImageProperties::new())
        }
    }

    fn extractor(image: Option<&str>, sample: RawSample) -> PatchExtractor<FixedSource> {
        let source = FixedSource {
            image: image.map(RemoteImageHandle::new),
            sample,
        };
        PatchExtractor::new(CollectionGateway::with_retry(source, RetryPolicy::none()))
    }

    fn region(span: usize) -> Region {
        compute_region(GeoPoint::new(-2.5, 40.1).unwrap(), span, 10.0).unwrap()
    }

    #[test]
    fn test_validate_year() {
        assert!(validate_year(2017).is_ok());
        assert!(validate_year(2020).is_ok());
        assert!(validate_year(Utc::now().year()).is_ok());
        assert!(matches!(validate_year(2016), Err(EmbedError::InvalidYear { .. })));
        assert!(validate_year(Utc::now().year() + 1).is_err());
    }

    #[test]
    fn test_extract_reconciles_ragged_sizes() {
        let mut sample = RawSample::new();
        sample.insert(band_name(0), vec![vec![1.0; 9]; 12]);
        sample.insert(band_name(1), vec![vec![2.0; 6]; 6]);

        let patch = extractor(Some("img"), sample).extract(&region(8), 2020).unwrap();
        assert_eq!(patch.data().dim(), (64, 8, 8));
        assert_eq!(patch.bands_found(), 2);
        assert_eq!(patch.bands_filled(), 62);
        assert!(patch.band(0).unwrap().iter().all(|&v| v == 1.0));
        assert_eq!(patch.band(1).unwrap().sum(), 2.0 * 36.0);
        assert!(patch.band(64).is_none());
    }

    #[test]
    fn test_extract_without_image() {
        let ex = extractor(None, RawSample::new());
        assert!(ex.extract(&region(5), 2020).is_none());
        assert!(ex.try_extract(&region(5), 2020).unwrap().is_none());
    }

    #[test]
    fn test_extract_empty_sample_is_failure() {
        let ex = extractor(Some("img"), RawSample::new());
        assert!(matches!(ex.try_extract(&region(5), 2020), Err(EmbedError::Extraction(_))));
        assert!(ex.extract(&region(5), 2020).is_none());
    }

    #[test]
    fn test_cancelled_extraction_returns_none() {
        let mut sample = RawSample::new();
        sample.insert(band_name(0), vec![vec![1.0; 5]; 5]);
        let source = FixedSource {
            image: Some(RemoteImageHandle::new("img")),
            sample,
        };
        let options = ExtractionOptions::default();
        options.cancel.cancel();
        let ex = PatchExtractor::with_options(
            CollectionGateway::with_retry(source, RetryPolicy::none()),
            options,
        );
        assert!(matches!(ex.try_extract(&region(5), 2020), Err(EmbedError::Cancelled(_))));
        assert!(ex.extract(&region(5), 2020).is_none());
    }

    #[test]
    fn test_huge_timeout_does_not_abort_extraction() {
        let mut sample = RawSample::new();
        sample.insert(band_name(0), vec![vec![1.0; 5]; 5]);
        let source = FixedSource {
            image: Some(RemoteImageHandle::new("img")),
            sample,
        };
        let ex = PatchExtractor::with_options(
            CollectionGateway::with_retry(source, RetryPolicy::none()),
            ExtractionOptions::with_timeout(Duration::from_secs(u64::MAX)),
        );
        let patch = ex.extract(&region(5), 2020).unwrap();
        assert_eq!(patch.data().dim(), (64, 5, 5));
    }

    #[test]
    fn test_patch_shape_is_checked() {
        let cube = PatchCube::zeros((64, 4, 4));
        assert!(EmbeddingPatch::new(cube.clone(), region(5), 2020, 1).is_err());
        assert!(EmbeddingPatch::new(cube.clone(), region(4), 2020, 0).is_err());
        let patch = EmbeddingPatch::new(cube, region(4), 2020, 64).unwrap();
        assert_eq!(patch.pixel_span(), 4);
        assert_eq!(patch.bands()[63], "A63");
    }
}

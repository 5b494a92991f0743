#![allow(dead_code)]

use mangroves::core::normalize::band_name;
use mangroves::types::{
    BoundingBox, DateRange, EmbedError, EmbedResult, ImageProperties, RawSample, RemoteImageHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory data source with scripted coverage and band content
pub struct FakeSource {
    /// Image returned for every lookup, `None` for no coverage
    pub image: Option<String>,
    /// Band indices present in every sample
    pub bands: Vec<usize>,
    /// Raw raster size returned per band (rows, cols)
    pub raw_shape: (usize, usize),
    /// Lookups that fail with a transient error before succeeding
    pub failing_lookups: usize,
    pub lookups: AtomicUsize,
    pub samples: AtomicUsize,
}

impl FakeSource {
    pub fn covered(bands: Vec<usize>, raw_shape: (usize, usize)) -> Self {
        Self {
            image: Some("GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/fake".to_string()),
            bands,
            raw_shape,
            failing_lookups: 0,
            lookups: AtomicUsize::new(0),
            samples: AtomicUsize::new(0),
        }
    }

    pub fn uncovered() -> Self {
        Self {
            image: None,
            ..Self::covered(Vec::new(), (0, 0))
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

/// Raw value of `band` at raw row `row`: unique per band and row
pub fn raw_value(band: usize, row: usize) -> f64 {
    ((band + 1) * 1000 + row) as f64
}

impl mangroves::EmbeddingSource for FakeSource {
    fn query_images(&self, _bounds: &BoundingBox, _window: &DateRange) -> EmbedResult<Vec<RemoteImageHandle>> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst);
        if n < self.failing_lookups {
            return Err(EmbedError::DataSource("503 Service Unavailable".to_string()));
        }
        Ok(self.image.iter().map(RemoteImageHandle::new).collect())
    }

    fn sample_rectangle(
        &self,
        _image: &RemoteImageHandle,
        _bounds: &BoundingBox,
        _default_value: f64,
        band_filter: &[String],
    ) -> EmbedResult<RawSample> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let (rows, cols) = self.raw_shape;
        let mut sample = RawSample::new();
        for &band in &self.bands {
            let name = band_name(band);
            if band_filter.contains(&name) {
                let raster = (0..rows).map(|r| vec![raw_value(band, r); cols]).collect();
                sample.insert(name, raster);
            }
        }
        Ok(sample)
    }

    fn get_properties(&self, _image: &RemoteImageHandle) -> EmbedResult<ImageProperties> {
        let mut props = ImageProperties::new();
        props.insert("system:index".to_string(), serde_json::json!("fake"));
        Ok(props)
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

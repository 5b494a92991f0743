//! File-based extraction settings
//!
//! Groups the per-concern parameter structs into one serde document so a whole
//! extraction run can be described in a single JSON file. Every field has a
//! default, so a file only needs the values it changes.

use crate::core::batch::BatchParams;
use crate::core::extractor::{ExtractionOptions, PatchExtractor};
use crate::core::geometry::{Region, RegionParams};
use crate::io::collection::CollectionGateway;
use crate::io::earth_engine::{EarthEngineConfig, EarthEngineSource};
use crate::io::retry::{CancellationToken, RetryPolicy};
use crate::io::source::EmbeddingSource;
use crate::types::{EmbedError, EmbedResult, GeoPoint, DEFAULT_PIXEL_SPAN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Patch edge length in pixels
    pub pixel_span: usize,
    pub region: RegionParams,
    pub retry: RetryPolicy,
    /// Wall-clock budget per extraction, retries included
    pub timeout: Option<Duration>,
    /// Worker threads for batch runs
    pub max_workers: usize,
    pub earth_engine: EarthEngineConfig,
    /// Archive directory for batch runs
    pub output_dir: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pixel_span: DEFAULT_PIXEL_SPAN,
            region: RegionParams::default(),
            retry: RetryPolicy::default(),
            timeout: None,
            max_workers: 4,
            earth_engine: EarthEngineConfig::from_env(),
            output_dir: None,
        }
    }
}

impl ExtractionConfig {
    /// Parse and validate a JSON document. `EARTHENGINE_*` variables override
    /// the document's `earth_engine` section.
    pub fn from_json_str(json: &str) -> EmbedResult<Self> {
        Self::from_json_str_with(json, |name| std::env::var(name).ok())
    }

    fn from_json_str_with<F: Fn(&str) -> Option<String>>(json: &str, lookup: F) -> EmbedResult<Self> {
        let mut config: Self = serde_json::from_str(json)
            .map_err(|e| EmbedError::Config(format!("Invalid extraction config: {}", e)))?;
        config.earth_engine.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> EmbedResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EmbedError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded extraction config from {}", path.display());
        Ok(config)
    }

    /// Write the config as pretty JSON (the access token is omitted)
    pub fn to_json_string(&self) -> EmbedResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EmbedError::Config(format!("Failed to serialize config: {}", e)))
    }

    pub fn validate(&self) -> EmbedResult<()> {
        if self.pixel_span == 0 {
            return Err(EmbedError::Config("pixel_span must be positive".to_string()));
        }
        if !(self.region.resolution_m.is_finite() && self.region.resolution_m > 0.0) {
            return Err(EmbedError::Config(format!(
                "resolution_m must be positive, got {}",
                self.region.resolution_m
            )));
        }
        if self.max_workers == 0 {
            return Err(EmbedError::Config("max_workers must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EmbedError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Region around `center` with the configured span and geometry
    pub fn region_for(&self, center: GeoPoint) -> EmbedResult<Region> {
        Region::new(center, self.pixel_span, &self.region)
    }

    pub fn extraction_options(&self, cancel: CancellationToken) -> ExtractionOptions {
        ExtractionOptions {
            cancel,
            timeout: self.timeout,
        }
    }

    pub fn batch_params(&self) -> BatchParams {
        BatchParams {
            max_workers: self.max_workers,
            pixel_span: self.pixel_span,
            region: self.region,
            output_dir: self.output_dir.clone(),
        }
    }

    /// Extractor over any data source, using the configured retry and timeout
    pub fn extractor_with<S: EmbeddingSource>(&self, source: S, cancel: CancellationToken) -> PatchExtractor<S> {
        let gateway = CollectionGateway::with_retry(source, self.retry.clone());
        PatchExtractor::with_options(gateway, self.extraction_options(cancel))
    }

    /// Extractor over the Earth Engine REST API
    pub fn build_extractor(&self, cancel: CancellationToken) -> EmbedResult<PatchExtractor<EarthEngineSource>> {
        let source = EarthEngineSource::new(self.earth_engine.clone())?;
        Ok(self.extractor_with(source, cancel))
    }
}

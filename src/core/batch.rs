use crate::core::extractor::{validate_year, PatchExtractor};
use crate::core::geometry::{Region, RegionParams};
use crate::io::patch_record::PatchRecord;
use crate::io::source::EmbeddingSource;
use crate::types::{EmbedError, EmbedResult, GeoPoint, DEFAULT_PIXEL_SPAN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One point/year to extract
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchRequest {
    pub feature_id: i64,
    pub center: GeoPoint,
    pub year: i32,
}

impl PatchRequest {
    /// Validated request; bad coordinates or years fail immediately
    pub fn new(feature_id: i64, latitude_deg: f64, longitude_deg: f64, year: i32) -> EmbedResult<Self> {
        let center = GeoPoint::new(latitude_deg, longitude_deg)?;
        validate_year(year)?;
        Ok(Self {
            feature_id,
            center,
            year,
        })
    }
}

/// Batch extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchParams {
    /// Concurrent extractions in flight (upper bound on parallel remote requests)
    pub max_workers: usize,
    /// Patch edge length in pixels
    pub pixel_span: usize,
    /// Region geometry and resolution
    pub region: RegionParams,
    /// Where archives are written; `None` keeps records in memory
    pub output_dir: Option<PathBuf>,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            max_workers: 4,
            pixel_span: DEFAULT_PIXEL_SPAN,
            region: RegionParams::default(),
            output_dir: None,
        }
    }
}

/// What happened to one request
#[derive(Debug)]
pub enum BatchStatus {
    /// Patch written to this archive
    Saved(PathBuf),
    /// Patch kept in memory (no output directory configured)
    Extracted(Box<PatchRecord>),
    /// The collection has no image for this point and year
    NoCoverage,
    /// Extraction or persistence failed; the error has been logged
    Failed(String),
    /// Skipped or interrupted by cancellation
    Cancelled,
}

/// Outcome of one request, in input order
#[derive(Debug)]
pub struct BatchOutcome {
    pub feature_id: i64,
    pub year: i32,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, BatchStatus::Saved(_) | BatchStatus::Extracted(_))
    }
}

/// Archive file name for a feature and year
pub fn patch_file_name(feature_id: i64, year: i32) -> String {
    format!("{}_{}.npz", feature_id, year)
}

/// Runs many extractions through one extractor on a bounded worker pool
pub struct BatchExtractor<'a, S> {
    extractor: &'a PatchExtractor<S>,
    params: BatchParams,
}

impl<'a, S: EmbeddingSource + Sync> BatchExtractor<'a, S> {
    pub fn new(extractor: &'a PatchExtractor<S>, params: BatchParams) -> Self {
        Self { extractor, params }
    }

    pub fn params(&self) -> &BatchParams {
        &self.params
    }

    /// Process every request. Individual failures never abort the batch.
    pub fn run(&self, requests: &[PatchRequest]) -> EmbedResult<Vec<BatchOutcome>> {
        log::info!(
            "Extracting {} patches with up to {} workers",
            requests.len(),
            self.params.max_workers.max(1)
        );

        let outcomes = self.run_all(requests)?;

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let no_coverage = outcomes
            .iter()
            .filter(|o| matches!(o.status, BatchStatus::NoCoverage))
            .count();
        log::info!(
            "Batch finished: {} succeeded, {} without coverage, {} failed or cancelled",
            succeeded,
            no_coverage,
            outcomes.len() - succeeded - no_coverage
        );
        Ok(outcomes)
    }

    #[cfg(feature = "parallel")]
    fn run_all(&self, requests: &[PatchRequest]) -> EmbedResult<Vec<BatchOutcome>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.max_workers.max(1))
            .thread_name(|i| format!("patch-worker-{}", i))
            .build()
            .map_err(|e| EmbedError::Config(format!("Failed to build worker pool: {}", e)))?;

        Ok(pool.install(|| requests.par_iter().map(|r| self.process(r)).collect()))
    }

    #[cfg(not(feature = "parallel"))]
    fn run_all(&self, requests: &[PatchRequest]) -> EmbedResult<Vec<BatchOutcome>> {
        Ok(requests.iter().map(|r| self.process(r)).collect())
    }

    fn process(&self, request: &PatchRequest) -> BatchOutcome {
        let status = self.process_status(request);
        BatchOutcome {
            feature_id: request.feature_id,
            year: request.year,
            status,
        }
    }

    fn process_status(&self, request: &PatchRequest) -> BatchStatus {
        if self.extractor.options().cancel.is_cancelled() {
            return BatchStatus::Cancelled;
        }

        let region = match Region::new(request.center, self.params.pixel_span, &self.params.region) {
            Ok(region) => region,
            Err(e) => {
                log::error!("Feature {}: invalid region: {}", request.feature_id, e);
                return BatchStatus::Failed(e.to_string());
            }
        };

        let patch = match self.extractor.try_extract(&region, request.year) {
            Ok(Some(patch)) => patch,
            Ok(None) => return BatchStatus::NoCoverage,
            Err(EmbedError::Cancelled(msg)) => {
                log::warn!("Feature {}: {}", request.feature_id, msg);
                return BatchStatus::Cancelled;
            }
            Err(e) => {
                log::error!(
                    "Feature {}: error extracting patch for {} in year {}: {}",
                    request.feature_id,
                    request.center,
                    request.year,
                    e
                );
                return BatchStatus::Failed(e.to_string());
            }
        };

        let record = PatchRecord::new(request.feature_id, patch);
        match &self.params.output_dir {
            Some(dir) => save_record(&record, dir, request),
            None => BatchStatus::Extracted(Box::new(record)),
        }
    }
}

fn save_record(record: &PatchRecord, dir: &Path, request: &PatchRequest) -> BatchStatus {
    let path = dir.join(patch_file_name(request.feature_id, request.year));
    match record.save(&path) {
        Ok(()) => BatchStatus::Saved(path),
        Err(e) => BatchStatus::Failed(e.to_string()),
    }
}

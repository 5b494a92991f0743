//! Python bindings for training-pipeline data loaders
//!
//! Every call produces one array per `(point, year)` or `None`; only invalid
//! arguments raise.

use crate::config::ExtractionConfig;
use crate::core::batch::patch_file_name;
use crate::core::extractor::{validate_year, PatchExtractor};
use crate::io::earth_engine::EarthEngineSource;
use crate::io::patch_record::{load_data, PatchRecord};
use crate::io::retry::CancellationToken;
use crate::types::{EmbedError, GeoPoint};
use numpy::{IntoPyArray, PyArray3};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::path::PathBuf;

fn value_error(e: EmbedError) -> PyErr {
    PyErr::new::<PyValueError, _>(format!("{}", e))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyEmbeddingExtractor>()?;
    m.add_function(wrap_pyfunction!(load_patch, m)?)?;
    m.add_function(wrap_pyfunction!(patch_filename, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}

/// Python wrapper for PatchExtractor over Earth Engine
#[pyclass(name = "EmbeddingExtractor")]
struct PyEmbeddingExtractor {
    inner: PatchExtractor<EarthEngineSource>,
    config: ExtractionConfig,
    cancel: CancellationToken,
}

#[pymethods]
impl PyEmbeddingExtractor {
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<PathBuf>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => ExtractionConfig::from_json_file(path).map_err(value_error)?,
            None => ExtractionConfig::default(),
        };
        let cancel = CancellationToken::new();
        let inner = config
            .build_extractor(cancel.clone())
            .map_err(|e| PyErr::new::<PyRuntimeError, _>(format!("{}", e)))?;

        Ok(PyEmbeddingExtractor { inner, config, cancel })
    }

    /// `(64, span, span)` float32 array, or None without coverage or on failure
    fn extract<'py>(
        &self,
        py: Python<'py>,
        latitude: f64,
        longitude: f64,
        year: i32,
    ) -> PyResult<Option<&'py PyArray3<f32>>> {
        let center = GeoPoint::new(latitude, longitude).map_err(value_error)?;
        validate_year(year).map_err(value_error)?;
        let region = self.config.region_for(center).map_err(value_error)?;

        let patch = py.allow_threads(|| self.inner.extract(&region, year));
        Ok(patch.map(|p| p.into_data().into_pyarray(py)))
    }

    /// Extract and save as `<output_dir>/<feature_id>_<year>.npz` (or to `path`).
    /// Returns True when a file was written.
    #[pyo3(signature = (feature_id, latitude, longitude, year, path=None))]
    fn extract_to_file(
        &self,
        py: Python<'_>,
        feature_id: i64,
        latitude: f64,
        longitude: f64,
        year: i32,
        path: Option<PathBuf>,
    ) -> PyResult<bool> {
        let center = GeoPoint::new(latitude, longitude).map_err(value_error)?;
        validate_year(year).map_err(value_error)?;
        let region = self.config.region_for(center).map_err(value_error)?;

        let target = match path {
            Some(path) => path,
            None => self
                .config
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(patch_file_name(feature_id, year)),
        };

        Ok(py.allow_threads(|| match self.inner.extract(&region, year) {
            Some(patch) => PatchRecord::new(feature_id, patch).save(&target).is_ok(),
            None => false,
        }))
    }

    /// Stop in-flight and future extractions of this extractor
    fn cancel(&self) {
        self.cancel.cancel();
    }

    fn __repr__(&self) -> String {
        format!(
            "EmbeddingExtractor(pixel_span={}, resolution_m={}, collection='{}')",
            self.config.pixel_span,
            self.config.region.resolution_m,
            self.config.earth_engine.collection_id
        )
    }
}

/// Load the `data` array of a patch archive, or None if it cannot be read
#[pyfunction]
fn load_patch(py: Python<'_>, path: PathBuf) -> Option<&PyArray3<f32>> {
    load_data(&path).ok().map(|data| data.into_pyarray(py))
}

/// Archive file name used for a feature and year
#[pyfunction]
fn patch_filename(feature_id: i64, year: i32) -> String {
    patch_file_name(feature_id, year)
}

use crate::core::extractor::EmbeddingPatch;
use crate::core::geometry::{CornerRadius, Region, RegionGeometry, RegionParams};
use crate::core::normalize::canonical_band_names;
use crate::types::{EmbedError, EmbedResult, GeoPoint, PatchCube, NUM_BANDS};
use ndarray::{arr0, Array0, Array1};
use ndarray_npy::{
    NpzReader, NpzWriter, ReadDataError, ReadableElement, WritableElement, WriteDataError,
};
use py_literal::Value as PyValue;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Archive keys every patch file must contain
pub const REQUIRED_KEYS: [&str; 14] = [
    "data",
    "feature_id",
    "latitude_deg",
    "longitude_deg",
    "year",
    "pixel_span",
    "resolution_m",
    "band_names",
    "num_images",
    "flipud_applied",
    "bands_found",
    "region_geometry",
    "corner_radius",
    "format_version",
];

/// Bytes per band label (`A00`..`A63`)
const BAND_NAME_WIDTH: usize = 3;

/// NumPy dtype of the `band_names` entries: fixed-width byte strings
const BAND_LABEL_DESCR: &str = "|S3";

const FORMAT_VERSION: u32 = 1;

/// Extracted patch together with the feature it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    feature_id: i64,
    patch: EmbeddingPatch,
}

impl PatchRecord {
    pub fn new(feature_id: i64, patch: EmbeddingPatch) -> Self {
        Self { feature_id, patch }
    }

    pub fn feature_id(&self) -> i64 {
        self.feature_id
    }

    pub fn patch(&self) -> &EmbeddingPatch {
        &self.patch
    }

    pub fn into_patch(self) -> EmbeddingPatch {
        self.patch
    }

    /// Write the record to a compressed `.npz` archive, creating parent directories.
    ///
    /// The archive is written next to `path` and renamed into place, so a failed
    /// save never leaves a truncated file behind. Errors are logged.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> EmbedResult<()> {
        let path = path.as_ref();
        self.write_archive(path).map_err(|e| {
            let e = into_persistence(e);
            log::error!("Error saving patch to {}: {}", path.display(), e);
            e
        })
    }

    /// Read a record written by [`save`](Self::save). Errors are logged.
    pub fn load<P: AsRef<Path>>(path: P) -> EmbedResult<Self> {
        let path = path.as_ref();
        Self::read_archive(path).map_err(|e| {
            let e = into_persistence(e);
            log::error!("Error loading patch from {}: {}", path.display(), e);
            e
        })
    }

    fn write_archive(&self, path: &Path) -> EmbedResult<()> {
        let parent = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let patch = &self.patch;
        let region = patch.region();
        let center = region.center();

        let tmp = NamedTempFile::new_in(&parent)?;
        let mut npz = NpzWriter::new_compressed(tmp);
        add(&mut npz, "data", patch.data())?;
        add(&mut npz, "feature_id", &arr0(self.feature_id))?;
        add(&mut npz, "latitude_deg", &arr0(center.latitude_deg()))?;
        add(&mut npz, "longitude_deg", &arr0(center.longitude_deg()))?;
        add(&mut npz, "year", &arr0(patch.year()))?;
        add(&mut npz, "pixel_span", &arr0(region.requested_span() as u64))?;
        add(&mut npz, "resolution_m", &arr0(region.resolution_m()))?;
        add(&mut npz, "band_names", &encode_band_names(patch.bands())?)?;
        add(&mut npz, "num_images", &arr0(1_i64))?;
        add(&mut npz, "flipud_applied", &arr0(true))?;
        add(&mut npz, "bands_found", &arr0(patch.bands_found() as u64))?;
        add(&mut npz, "region_geometry", &arr0(region.geometry().code()))?;
        add(&mut npz, "corner_radius", &arr0(region.corner_radius().code()))?;
        add(&mut npz, "format_version", &arr0(FORMAT_VERSION))?;

        let tmp = npz
            .finish()
            .map_err(|e| EmbedError::Persistence(format!("Failed to finalize archive: {}", e)))?;
        tmp.persist(path)
            .map_err(|e| EmbedError::Persistence(format!("Failed to move archive into place: {}", e)))?;

        log::debug!("Saved patch for feature {} to {}", self.feature_id, path.display());
        Ok(())
    }

    fn read_archive(path: &Path) -> EmbedResult<Self> {
        let file = File::open(path)?;
        let mut npz = NpzReader::new(file)
            .map_err(|e| EmbedError::Persistence(format!("Not a patch archive: {}", e)))?;
        check_required_keys(&mut npz)?;

        let data: PatchCube = read(&mut npz, "data")?;
        let feature_id: i64 = read_scalar(&mut npz, "feature_id")?;
        let latitude_deg: f64 = read_scalar(&mut npz, "latitude_deg")?;
        let longitude_deg: f64 = read_scalar(&mut npz, "longitude_deg")?;
        let year: i32 = read_scalar(&mut npz, "year")?;
        let pixel_span: u64 = read_scalar(&mut npz, "pixel_span")?;
        let resolution_m: f64 = read_scalar(&mut npz, "resolution_m")?;
        let band_names: Array1<BandLabel> = read(&mut npz, "band_names")?;
        let flipud_applied: bool = read_scalar(&mut npz, "flipud_applied")?;
        let bands_found: u64 = read_scalar(&mut npz, "bands_found")?;
        let geometry_code: u8 = read_scalar(&mut npz, "region_geometry")?;
        let radius_code: u8 = read_scalar(&mut npz, "corner_radius")?;

        if decode_band_names(&band_names)? != canonical_band_names() {
            return Err(EmbedError::Persistence(
                "Band names are not in canonical order".to_string(),
            ));
        }
        if !flipud_applied {
            return Err(EmbedError::Persistence(
                "Archive holds unflipped rasters".to_string(),
            ));
        }

        let geometry = RegionGeometry::from_code(geometry_code).ok_or_else(|| {
            EmbedError::Persistence(format!("Unknown region geometry code {}", geometry_code))
        })?;
        let corner_radius = CornerRadius::from_code(radius_code).ok_or_else(|| {
            EmbedError::Persistence(format!("Unknown corner radius code {}", radius_code))
        })?;

        let center = GeoPoint::new(latitude_deg, longitude_deg)
            .map_err(|e| EmbedError::Persistence(format!("Stored center is invalid: {}", e)))?;
        let params = RegionParams {
            geometry,
            corner_radius,
            resolution_m,
        };
        let region = Region::new(center, pixel_span as usize, &params)
            .map_err(|e| EmbedError::Persistence(format!("Stored region is invalid: {}", e)))?;
        let patch = EmbeddingPatch::new(data, region, year, bands_found as usize)
            .map_err(|e| EmbedError::Persistence(format!("Stored patch is invalid: {}", e)))?;

        Ok(Self { feature_id, patch })
    }
}

/// Read only the `data` array of a patch archive. Errors are logged.
pub fn load_data<P: AsRef<Path>>(path: P) -> EmbedResult<PatchCube> {
    let path = path.as_ref();
    let result = File::open(path).map_err(EmbedError::from).and_then(|file| {
        let mut npz = NpzReader::new(file)
            .map_err(|e| EmbedError::Persistence(format!("Not a patch archive: {}", e)))?;
        read(&mut npz, "data")
    });
    result.map_err(|e| {
        let e = into_persistence(e);
        log::error!("Error loading patch from {}: {}", path.display(), e);
        e
    })
}

/// Archive failures surface as `Persistence`, whatever layer raised them
fn into_persistence(error: EmbedError) -> EmbedError {
    match error {
        EmbedError::Io(e) => EmbedError::Persistence(e.to_string()),
        other => other,
    }
}

fn add<W, A, D>(npz: &mut NpzWriter<W>, name: &str, array: &ndarray::Array<A, D>) -> EmbedResult<()>
where
    W: std::io::Write + Seek,
    A: ndarray_npy::WritableElement,
    D: ndarray::Dimension,
{
    npz.add_array(name, array)
        .map_err(|e| EmbedError::Persistence(format!("Failed to write '{}': {}", name, e)))
}

fn read<R, A, D>(npz: &mut NpzReader<R>, name: &str) -> EmbedResult<ndarray::Array<A, D>>
where
    R: Read + Seek,
    A: ReadableElement,
    D: ndarray::Dimension,
{
    let entry = resolve_entry(npz, name)?;
    npz.by_name(&entry)
        .map_err(|e| EmbedError::Persistence(format!("Failed to read '{}': {}", name, e)))
}

/// Archive entry holding array `name` (NumPy stores it as `name.npy`)
fn resolve_entry<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> EmbedResult<String> {
    let names = npz
        .names()
        .map_err(|e| EmbedError::Persistence(format!("Failed to list archive entries: {}", e)))?;
    names
        .into_iter()
        .find(|entry| entry.as_str() == name || entry.strip_suffix(".npy") == Some(name))
        .ok_or_else(|| EmbedError::Persistence(format!("Missing key: {}", name)))
}

fn read_scalar<R, A>(npz: &mut NpzReader<R>, name: &str) -> EmbedResult<A>
where
    R: Read + Seek,
    A: ReadableElement + Copy,
{
    let value: Array0<A> = read(npz, name)?;
    Ok(value[()])
}

fn check_required_keys<R: Read + Seek>(npz: &mut NpzReader<R>) -> EmbedResult<()> {
    let names = npz
        .names()
        .map_err(|e| EmbedError::Persistence(format!("Failed to list archive entries: {}", e)))?;
    let present: Vec<&str> = names.iter().map(|n| n.trim_end_matches(".npy")).collect();
    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|key| !present.contains(key))
        .collect();
    if !missing.is_empty() {
        return Err(EmbedError::Persistence(format!("Missing keys: {}", missing.join(", "))));
    }
    Ok(())
}

/// One band name stored as a NumPy `S3` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandLabel([u8; BAND_NAME_WIDTH]);

impl BandLabel {
    pub fn new(name: &str) -> EmbedResult<Self> {
        let bytes: [u8; BAND_NAME_WIDTH] = name
            .as_bytes()
            .try_into()
            .ok()
            .filter(|_| name.is_ascii())
            .ok_or_else(|| EmbedError::Persistence(format!("Unexpected band name '{}'", name)))?;
        Ok(Self(bytes))
    }

    pub fn to_name(&self) -> EmbedResult<String> {
        String::from_utf8(self.0.to_vec())
            .map_err(|e| EmbedError::Persistence(format!("Band name is not UTF-8: {}", e)))
    }
}

// SAFETY: the descriptor matches the bytes written, three per label with no padding.
unsafe impl WritableElement for BandLabel {
    fn type_descriptor() -> PyValue {
        PyValue::String(BAND_LABEL_DESCR.to_string())
    }

    fn write<W: Write>(&self, mut writer: W) -> Result<(), WriteDataError> {
        writer.write_all(&self.0)?;
        Ok(())
    }

    fn write_slice<W: Write>(slice: &[Self], mut writer: W) -> Result<(), WriteDataError> {
        for label in slice {
            writer.write_all(&label.0)?;
        }
        Ok(())
    }
}

impl ReadableElement for BandLabel {
    fn read_to_end_exact_vec<R: Read>(
        mut reader: R,
        type_desc: &PyValue,
        len: usize,
    ) -> Result<Vec<Self>, ReadDataError> {
        match type_desc {
            PyValue::String(descr) if descr == BAND_LABEL_DESCR || descr == "S3" => {
                let size = len
                    .checked_mul(BAND_NAME_WIDTH)
                    .ok_or_else(|| ReadDataError::ParseData("band_names length overflows".into()))?;
                let mut bytes = vec![0u8; size];
                reader.read_exact(&mut bytes)?;
                let extra = reader.read_to_end(&mut Vec::new())?;
                if extra != 0 {
                    return Err(ReadDataError::ExtraBytes(extra));
                }
                Ok(bytes
                    .chunks_exact(BAND_NAME_WIDTH)
                    .map(|c| BandLabel([c[0], c[1], c[2]]))
                    .collect())
            }
            other => Err(ReadDataError::WrongDescriptor(other.clone())),
        }
    }
}

fn encode_band_names(names: &[String]) -> EmbedResult<Array1<BandLabel>> {
    names
        .iter()
        .map(|name| BandLabel::new(name))
        .collect::<EmbedResult<Vec<_>>>()
        .map(Array1::from)
}

fn decode_band_names(labels: &Array1<BandLabel>) -> EmbedResult<Vec<String>> {
    if labels.len() != NUM_BANDS {
        return Err(EmbedError::Persistence(format!(
            "Archive holds {} band names, expected {}",
            labels.len(),
            NUM_BANDS
        )));
    }
    labels.iter().map(BandLabel::to_name).collect()
}

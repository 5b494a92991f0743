use crate::types::{BandRaster, EmbedError, EmbedResult, PatchCube, RawSample, NUM_BANDS};
use ndarray::{s, Array2, ArrayView2, Axis};
use num_traits::Zero;
use std::collections::BTreeMap;

/// Canonical identifier of band `index` (`A00`..`A63`)
pub fn band_name(index: usize) -> String {
    format!("A{:02}", index)
}

/// All band identifiers in canonical ascending order
pub fn canonical_band_names() -> Vec<String> {
    (0..NUM_BANDS).map(band_name).collect()
}

/// Canonical index of a band identifier, `None` for anything that is not `A00`..`A63`
pub fn band_index(name: &str) -> Option<usize> {
    let digits = name.strip_prefix('A')?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: usize = digits.parse().ok()?;
    (index < NUM_BANDS).then_some(index)
}

/// Crop each axis longer than `target` symmetrically around its center.
/// An odd excess removes the extra row/column from the trailing edge.
pub fn center_crop<T: Clone>(raster: ArrayView2<T>, target: usize) -> Array2<T> {
    let (rows, cols) = raster.dim();
    let (row_start, row_end) = crop_window(rows, target);
    let (col_start, col_end) = crop_window(cols, target);
    raster.slice(s![row_start..row_end, col_start..col_end]).to_owned()
}

/// Zero-pad each axis shorter than `target` symmetrically.
/// An odd deficit puts the extra row/column on the trailing edge.
pub fn pad_symmetric<T: Clone + Zero>(raster: ArrayView2<T>, target: usize) -> Array2<T> {
    let (rows, cols) = raster.dim();
    let out_rows = rows.max(target);
    let out_cols = cols.max(target);
    if out_rows == rows && out_cols == cols {
        return raster.to_owned();
    }

    let top = (out_rows - rows) / 2;
    let left = (out_cols - cols) / 2;
    let mut padded = Array2::zeros((out_rows, out_cols));
    padded
        .slice_mut(s![top..top + rows, left..left + cols])
        .assign(&raster);
    padded
}

/// Crop then pad so the raster is exactly `target x target`
pub fn reconcile_shape<T: Clone + Zero>(raster: ArrayView2<T>, target: usize) -> Array2<T> {
    let cropped = center_crop(raster, target);
    pad_symmetric(cropped.view(), target)
}

/// Reverse the row order (first row becomes last)
pub fn flip_vertical<T: Clone>(raster: ArrayView2<T>) -> Array2<T> {
    raster.slice(s![..;-1, ..]).to_owned()
}

/// Build a raster from sampled rows. Ragged or empty rows are rejected.
pub fn raster_from_rows(rows: &[Vec<f64>]) -> EmbedResult<BandRaster> {
    let height = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if height == 0 || width == 0 {
        return Err(EmbedError::Extraction(format!(
            "Empty raster ({} rows, {} columns)",
            height, width
        )));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, row)| row.len() != width) {
        return Err(EmbedError::Extraction(format!(
            "Ragged raster: row {} has {} values, expected {}",
            i,
            row.len(),
            width
        )));
    }

    let values: Vec<f32> = rows.iter().flatten().map(|&v| v as f32).collect();
    Array2::from_shape_vec((height, width), values)
        .map_err(|e| EmbedError::Extraction(format!("Failed to reshape raster: {}", e)))
}

/// Stacked patch cube and how it was assembled
#[derive(Debug, Clone)]
pub struct StackedBands {
    pub cube: PatchCube,
    /// Bands present in the raw sample
    pub found: usize,
    /// Bands zero-filled because they were absent or malformed
    pub filled: usize,
}

/// Turn a raw rectangle sample into a `(64, target, target)` cube.
///
/// Every canonical band present in `raw` is flipped to north-up row order and
/// reconciled to `target` pixels per side. Missing or malformed bands are filled
/// with zeros. Keys that are not canonical band identifiers are ignored.
pub fn normalize_sample(raw: &RawSample, target: usize) -> EmbedResult<StackedBands> {
    if target == 0 {
        return Err(EmbedError::Extraction("Target size must be at least 1".to_string()));
    }

    let mut bands: BTreeMap<usize, BandRaster> = BTreeMap::new();
    for (name, rows) in raw {
        let Some(index) = band_index(name) else {
            log::debug!("Ignoring non-band property '{}'", name);
            continue;
        };
        match raster_from_rows(rows) {
            Ok(raster) => {
                let flipped = flip_vertical(raster.view());
                bands.insert(index, reconcile_shape(flipped.view(), target));
            }
            Err(e) => log::warn!("Band {} is malformed and will be zero-filled: {}", name, e),
        }
    }

    stack_bands(&bands, target)
}

/// Stack reconciled bands in canonical order, zero-filling absent ones.
/// Fails when no band at all is present.
pub fn stack_bands(bands: &BTreeMap<usize, BandRaster>, target: usize) -> EmbedResult<StackedBands> {
    if bands.is_empty() {
        return Err(EmbedError::Extraction("No embedding bands found".to_string()));
    }

    let mut cube = PatchCube::zeros((NUM_BANDS, target, target));
    for (&index, raster) in bands {
        if index >= NUM_BANDS {
            return Err(EmbedError::Extraction(format!("Band index {} out of range", index)));
        }
        if raster.dim() != (target, target) {
            return Err(EmbedError::Extraction(format!(
                "Band {} has shape {:?}, expected ({}, {})",
                band_name(index),
                raster.dim(),
                target,
                target
            )));
        }
        cube.index_axis_mut(Axis(0), index).assign(raster);
    }

    let found = bands.len();
    Ok(StackedBands {
        cube,
        found,
        filled: NUM_BANDS - found,
    })
}

/// Half-open window keeping the central `target` entries of an axis of length `len`
fn crop_window(len: usize, target: usize) -> (usize, usize) {
    if len <= target {
        return (0, len);
    }
    let start = (len - target) / 2;
    (start, start + target)
}

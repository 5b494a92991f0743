use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean Earth radius used by every geodesic computation (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Native resolution of the annual embedding collection (meters/pixel)
pub const DEFAULT_RESOLUTION_M: f64 = 10.0;

/// Default patch edge length in pixels
pub const DEFAULT_PIXEL_SPAN: usize = 244;

/// Number of embedding bands (A00..A63)
pub const NUM_BANDS: usize = 64;

/// First year covered by the annual embedding collection
pub const FIRST_EMBEDDING_YEAR: i32 = 2017;

/// Asset id of the annual satellite embedding collection
pub const EMBEDDING_COLLECTION_ID: &str = "GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL";

/// Embedding sample value
pub type EmbeddingValue = f32;

/// 2D single-band raster (rows x columns)
pub type BandRaster = Array2<EmbeddingValue>;

/// 3D stacked patch (band x rows x columns)
pub type PatchCube = Array3<EmbeddingValue>;

/// Raw per-band rows as returned by a rectangle sample, possibly ragged
pub type RawSample = BTreeMap<String, Vec<Vec<f64>>>;

/// Arbitrary image metadata reported by the data source
pub type ImageProperties = BTreeMap<String, serde_json::Value>;

/// Validated geographic point (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedGeoPoint")]
pub struct GeoPoint {
    latitude_deg: f64,
    longitude_deg: f64,
}

#[derive(Deserialize)]
struct UncheckedGeoPoint {
    latitude_deg: f64,
    longitude_deg: f64,
}

impl TryFrom<UncheckedGeoPoint> for GeoPoint {
    type Error = EmbedError;

    fn try_from(raw: UncheckedGeoPoint) -> Result<Self, Self::Error> {
        GeoPoint::new(raw.latitude_deg, raw.longitude_deg)
    }
}

impl GeoPoint {
    /// Create a point, rejecting latitudes outside [-90, 90] and longitudes outside [-180, 180]
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> EmbedResult<Self> {
        if !(-90.0..=90.0).contains(&latitude_deg) || !(-180.0..=180.0).contains(&longitude_deg) {
            log::error!(
                "Invalid coordinates: latitude {} must be in [-90, 90], longitude {} must be in [-180, 180]",
                latitude_deg,
                longitude_deg
            );
            return Err(EmbedError::InvalidCoordinate {
                latitude_deg,
                longitude_deg,
            });
        }

        Ok(Self {
            latitude_deg,
            longitude_deg,
        })
    }

    /// Build a point from values already known to be in range (clamped for float noise)
    pub(crate) fn from_radians(lat_rad: f64, lon_rad: f64) -> Self {
        Self {
            latitude_deg: lat_rad.to_degrees().clamp(-90.0, 90.0),
            longitude_deg: lon_rad.to_degrees().clamp(-180.0, 180.0),
        }
    }

    pub fn latitude_deg(&self) -> f64 {
        self.latitude_deg
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_deg
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4})", self.latitude_deg, self.longitude_deg)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box containing every point
    pub fn enclosing(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min_lon: first.longitude_deg(),
            max_lon: first.longitude_deg(),
            min_lat: first.latitude_deg(),
            max_lat: first.latitude_deg(),
        };
        for p in &points[1..] {
            bbox.min_lon = bbox.min_lon.min(p.longitude_deg());
            bbox.max_lon = bbox.max_lon.max(p.longitude_deg());
            bbox.min_lat = bbox.min_lat.min(p.latitude_deg());
            bbox.max_lat = bbox.max_lat.max(p.latitude_deg());
        }
        Some(bbox)
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// `[xMin, yMin, xMax, yMax]` ordering used by rectangle constructors
    pub fn to_coordinates(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Closed GeoJSON polygon ring (counter-clockwise, lon/lat order)
    pub fn to_geojson_polygon(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Polygon",
            "coordinates": [[
                [self.min_lon, self.min_lat],
                [self.max_lon, self.min_lat],
                [self.max_lon, self.max_lat],
                [self.min_lon, self.max_lat],
                [self.min_lon, self.min_lat],
            ]],
        })
    }
}

/// Half-open acquisition window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// `[year-01-01, (year+1)-01-01)`
    pub fn for_year(year: i32) -> EmbedResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1);
        let end = year
            .checked_add(1)
            .and_then(|next| NaiveDate::from_ymd_opt(next, 1, 1));
        match (start, end) {
            (Some(start), Some(end)) => Ok(Self { start, end }),
            _ => Err(EmbedError::InvalidYear {
                year,
                min: FIRST_EMBEDDING_YEAR,
                max: Utc::now().year(),
            }),
        }
    }

    /// RFC 3339 timestamp of the window start (midnight UTC)
    pub fn start_rfc3339(&self) -> String {
        format!("{}T00:00:00Z", self.start.format("%Y-%m-%d"))
    }

    /// RFC 3339 timestamp of the (exclusive) window end
    pub fn end_rfc3339(&self) -> String {
        format!("{}T00:00:00Z", self.end.format("%Y-%m-%d"))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

/// Reference to one image of the remote collection. Valid for a single extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteImageHandle {
    /// Asset identifier, e.g. `GOOGLE/SATELLITE_EMBEDDING/V1/ANNUAL/xxxx`
    pub id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl RemoteImageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: None,
            end_time: None,
        }
    }
}

/// Error types for region computation, remote access and patch persistence
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid coordinate: latitude {latitude_deg}, longitude {longitude_deg}")]
    InvalidCoordinate { latitude_deg: f64, longitude_deg: f64 },

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid year {year}: must be between {min} and {max}")]
    InvalidYear { year: i32, min: i32, max: i32 },

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Extraction failure: {0}")]
    Extraction(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl EmbedError {
    /// Whether repeating the same remote call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::DataSource(_))
    }
}

/// Result type for embedding operations
pub type EmbedResult<T> = Result<T, EmbedError>;

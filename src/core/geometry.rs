//! Geodesic region computation
//!
//! Turns a center point and a pixel span into the lat/lon rectangle that the remote
//! collection is queried and sampled over. Two placement strategies are supported
//! and must be selected explicitly; they are not numerically interchangeable.

use crate::types::{
    BoundingBox, EmbedError, EmbedResult, GeoPoint, DEFAULT_RESOLUTION_M, EARTH_RADIUS_M,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Meters per degree of latitude on the reference sphere (~111 195 m)
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

/// Cardinal bearings (degrees) used to place the region edges: N, E, S, W
const CARDINAL_BEARINGS_DEG: [f64; 4] = [0.0, 90.0, 180.0, 270.0];

/// How the region edges are placed around the center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionGeometry {
    /// Direct great-circle destination along each cardinal bearing
    #[default]
    Spherical,
    /// Meters-per-degree approximation, undefined at the poles
    Planar,
}

/// How the center-to-edge distance is derived from the pixel span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerRadius {
    /// `(span - 1) / 2 * resolution`: edges pass through the centers of the outer pixels
    #[default]
    CenteredPixel,
    /// `span / 2 * resolution`: edges pass along the outer pixel boundaries
    HalfSpan,
}

impl RegionGeometry {
    /// Stable code used in persisted archives
    pub fn code(self) -> u8 {
        match self {
            RegionGeometry::Spherical => 0,
            RegionGeometry::Planar => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RegionGeometry::Spherical),
            1 => Some(RegionGeometry::Planar),
            _ => None,
        }
    }
}

impl CornerRadius {
    /// Stable code used in persisted archives
    pub fn code(self) -> u8 {
        match self {
            CornerRadius::CenteredPixel => 0,
            CornerRadius::HalfSpan => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CornerRadius::CenteredPixel),
            1 => Some(CornerRadius::HalfSpan),
            _ => None,
        }
    }
}

/// Region construction parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionParams {
    /// Edge placement strategy
    pub geometry: RegionGeometry,
    /// Center-to-edge distance rule
    pub corner_radius: CornerRadius,
    /// Spatial resolution in meters per pixel
    pub resolution_m: f64,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            geometry: RegionGeometry::Spherical,
            corner_radius: CornerRadius::CenteredPixel,
            resolution_m: DEFAULT_RESOLUTION_M, // 10 m embedding grid
        }
    }
}

/// The four points placed along the cardinal bearings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardinalPoints {
    pub north: GeoPoint,
    pub east: GeoPoint,
    pub south: GeoPoint,
    pub west: GeoPoint,
}

impl CardinalPoints {
    pub fn as_array(&self) -> [GeoPoint; 4] {
        [self.north, self.east, self.south, self.west]
    }
}

/// Immutable extraction region around a center point
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    center: GeoPoint,
    requested_span: usize,
    pixel_span: usize,
    centering_adjusted: bool,
    resolution_m: f64,
    geometry: RegionGeometry,
    corner_radius: CornerRadius,
    corners: CardinalPoints,
    bounds: BoundingBox,
    crosses_antimeridian: bool,
}

impl Region {
    /// Build the region for `center` covering `pixel_span` pixels per side
    pub fn new(center: GeoPoint, pixel_span: usize, params: &RegionParams) -> EmbedResult<Self> {
        if pixel_span == 0 {
            return Err(EmbedError::InvalidRegion(
                "Pixel span must be at least 1".to_string(),
            ));
        }
        if !params.resolution_m.is_finite() || params.resolution_m <= 0.0 {
            return Err(EmbedError::InvalidRegion(format!(
                "Resolution must be a positive number of meters, got {}",
                params.resolution_m
            )));
        }

        let (effective_span, centering_adjusted) = odd_span(pixel_span);
        if centering_adjusted {
            log::debug!(
                "Pixel span {} is even, using {} so a center pixel exists",
                pixel_span,
                effective_span
            );
        }

        let radius_m = corner_radius_m(effective_span, params.resolution_m, params.corner_radius);
        let corners = match params.geometry {
            RegionGeometry::Spherical => spherical_corners(center, radius_m),
            RegionGeometry::Planar => planar_corners(center, radius_m)?,
        };

        let mut bounds = BoundingBox::enclosing(&corners.as_array()).ok_or_else(|| {
            EmbedError::InvalidRegion("No corner points computed".to_string())
        })?;

        let contains_pole = params.geometry == RegionGeometry::Spherical
            && enclose_poles(&mut bounds, center, radius_m);
        let crosses_antimeridian =
            !contains_pole && corners.east.longitude_deg() < corners.west.longitude_deg();
        if crosses_antimeridian {
            log::warn!(
                "Region around {} straddles the antimeridian and cannot be queried as one rectangle",
                center
            );
        }

        log::debug!(
            "Region {} span={} radius={:.1} m bounds={:?}",
            center,
            effective_span,
            radius_m,
            bounds
        );

        Ok(Self {
            center,
            requested_span: pixel_span,
            pixel_span: effective_span,
            centering_adjusted,
            resolution_m: params.resolution_m,
            geometry: params.geometry,
            corner_radius: params.corner_radius,
            corners,
            bounds,
            crosses_antimeridian,
        })
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    /// Span the caller asked for; this is the edge length of extracted patches
    pub fn requested_span(&self) -> usize {
        self.requested_span
    }

    /// Odd span used for the geometry
    pub fn pixel_span(&self) -> usize {
        self.pixel_span
    }

    pub fn centering_adjusted(&self) -> bool {
        self.centering_adjusted
    }

    pub fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    pub fn geometry(&self) -> RegionGeometry {
        self.geometry
    }

    pub fn corner_radius(&self) -> CornerRadius {
        self.corner_radius
    }

    /// Parameters that rebuild this region from its center and requested span
    pub fn params(&self) -> RegionParams {
        RegionParams {
            geometry: self.geometry,
            corner_radius: self.corner_radius,
            resolution_m: self.resolution_m,
        }
    }

    pub fn corners(&self) -> &CardinalPoints {
        &self.corners
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// East edge lies west of the west edge; the min/max box would span most of the globe
    pub fn crosses_antimeridian(&self) -> bool {
        self.crosses_antimeridian
    }

    /// Ground distance from the center to each edge
    pub fn radius_m(&self) -> f64 {
        corner_radius_m(self.pixel_span, self.resolution_m, self.corner_radius)
    }

    /// `(pixel_span * resolution_m)^2`
    pub fn area_m2(&self) -> f64 {
        let side = self.pixel_span as f64 * self.resolution_m;
        side * side
    }
}

/// Region around `center` with the default strategy (spherical, centered-pixel radius)
pub fn compute_region(center: GeoPoint, pixel_span: usize, resolution_m: f64) -> EmbedResult<Region> {
    let params = RegionParams {
        resolution_m,
        ..RegionParams::default()
    };
    Region::new(center, pixel_span, &params)
}

/// Force the span to odd parity. Returns the span and whether it was adjusted.
pub fn odd_span(pixel_span: usize) -> (usize, bool) {
    if pixel_span % 2 == 0 {
        (pixel_span + 1, true)
    } else {
        (pixel_span, false)
    }
}

/// Center-to-edge ground distance for a span under the given rule
pub fn corner_radius_m(pixel_span: usize, resolution_m: f64, rule: CornerRadius) -> f64 {
    match rule {
        CornerRadius::CenteredPixel => pixel_span.saturating_sub(1) as f64 / 2.0 * resolution_m,
        CornerRadius::HalfSpan => pixel_span as f64 / 2.0 * resolution_m,
    }
}

/// Destination reached from `origin` after `distance_m` along `bearing_deg` on a great circle
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let lat0 = origin.latitude_deg().to_radians();
    let lon0 = origin.longitude_deg().to_radians();
    let theta = bearing_deg.to_radians();
    let delta = distance_m / EARTH_RADIUS_M;

    let sin_lat = (lat0.sin() * delta.cos() + lat0.cos() * delta.sin() * theta.cos()).clamp(-1.0, 1.0);
    let lat = sin_lat.asin();
    let y = theta.sin() * delta.sin() * lat0.cos();
    let x = delta.cos() - lat0.sin() * sin_lat;
    let lon = normalize_longitude_rad(lon0 + y.atan2(x));

    GeoPoint::from_radians(lat, lon)
}

/// Great-circle distance between two points (meters)
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude_deg().to_radians();
    let lat2 = b.latitude_deg().to_radians();
    let dlat = (b.latitude_deg() - a.latitude_deg()).to_radians();
    let dlon = (b.longitude_deg() - a.longitude_deg()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// `n_points` points at `distance_m` from `center`, bearings evenly spaced from north
pub fn geodesic_circle(center: GeoPoint, distance_m: f64, n_points: usize) -> Vec<GeoPoint> {
    (0..n_points)
        .map(|k| {
            let bearing_deg = 360.0 * k as f64 / n_points as f64;
            destination_point(center, bearing_deg, distance_m)
        })
        .collect()
}

/// Planar counterpart of [`geodesic_circle`]
pub fn planar_circle(center: GeoPoint, distance_m: f64, n_points: usize) -> EmbedResult<Vec<GeoPoint>> {
    let cos_lat = planar_cos_lat(center)?;
    let points = (0..n_points)
        .map(|k| {
            let theta = 2.0 * PI * k as f64 / n_points as f64;
            let dlat = distance_m * theta.cos() / METERS_PER_DEGREE;
            let dlon = distance_m * theta.sin() / (METERS_PER_DEGREE * cos_lat);
            planar_point(center, dlat, dlon)
        })
        .collect();
    Ok(points)
}

fn spherical_corners(center: GeoPoint, radius_m: f64) -> CardinalPoints {
    let [north, east, south, west] =
        CARDINAL_BEARINGS_DEG.map(|bearing| destination_point(center, bearing, radius_m));
    CardinalPoints {
        north,
        east,
        south,
        west,
    }
}

/// Stretch the box to the pole (and all longitudes) when the cap around `center`
/// reaches it. Returns whether a pole was enclosed.
fn enclose_poles(bounds: &mut BoundingBox, center: GeoPoint, radius_m: f64) -> bool {
    let reach_deg = (radius_m / EARTH_RADIUS_M).to_degrees();
    let north = center.latitude_deg() + reach_deg >= 90.0;
    let south = center.latitude_deg() - reach_deg <= -90.0;
    if north {
        bounds.max_lat = 90.0;
    }
    if south {
        bounds.min_lat = -90.0;
    }
    if north || south {
        bounds.min_lon = -180.0;
        bounds.max_lon = 180.0;
    }
    north || south
}

fn planar_corners(center: GeoPoint, radius_m: f64) -> EmbedResult<CardinalPoints> {
    let cos_lat = planar_cos_lat(center)?;
    let dlat = radius_m / METERS_PER_DEGREE;
    let dlon = radius_m / (METERS_PER_DEGREE * cos_lat);

    Ok(CardinalPoints {
        north: planar_point(center, dlat, 0.0),
        east: planar_point(center, 0.0, dlon),
        south: planar_point(center, -dlat, 0.0),
        west: planar_point(center, 0.0, -dlon),
    })
}

fn planar_cos_lat(center: GeoPoint) -> EmbedResult<f64> {
    let cos_lat = center.latitude_deg().to_radians().cos();
    if cos_lat.abs() < 1e-12 {
        return Err(EmbedError::InvalidRegion(format!(
            "Planar geometry is undefined at latitude {}; use the spherical geometry near the poles",
            center.latitude_deg()
        )));
    }
    Ok(cos_lat)
}

// Latitude is clamped and longitude wrapped so the planar offsets stay valid coordinates.
fn planar_point(center: GeoPoint, dlat_deg: f64, dlon_deg: f64) -> GeoPoint {
    let lat = (center.latitude_deg() + dlat_deg).clamp(-90.0, 90.0);
    let lon = normalize_longitude_rad((center.longitude_deg() + dlon_deg).to_radians());
    GeoPoint::from_radians(lat.to_radians(), lon)
}

/// Wrap a longitude into [-pi, pi)
fn normalize_longitude_rad(lon_rad: f64) -> f64 {
    (lon_rad + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    #[test]
    fn test_odd_span() {
        assert_eq!(odd_span(244), (245, true));
        assert_eq!(odd_span(245), (245, false));
        assert_eq!(odd_span(1), (1, false));
        assert_eq!(odd_span(2), (3, true));
    }

    #[test]
    fn test_corner_radius_rules() {
        assert_abs_diff_eq!(corner_radius_m(245, 10.0, CornerRadius::CenteredPixel), 1220.0);
        assert_abs_diff_eq!(corner_radius_m(245, 10.0, CornerRadius::HalfSpan), 1225.0);
        assert_abs_diff_eq!(corner_radius_m(1, 10.0, CornerRadius::CenteredPixel), 0.0);
    }

    #[test]
    fn test_destination_north_at_equator() {
        let delta = 10_000.0 / EARTH_RADIUS_M;
        let north = destination_point(point(0.0, 0.0), 0.0, 10_000.0);
        assert_abs_diff_eq!(north.latitude_deg(), delta.to_degrees(), epsilon = 1e-12);
        assert_abs_diff_eq!(north.longitude_deg(), 0.0, epsilon = 1e-12);

        let east = destination_point(point(0.0, 0.0), 90.0, 10_000.0);
        assert_abs_diff_eq!(east.latitude_deg(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(east.longitude_deg(), delta.to_degrees(), epsilon = 1e-12);
    }

    #[test]
    fn test_longitude_wraps_across_antimeridian() {
        let east = destination_point(point(0.0, 179.999), 90.0, 10_000.0);
        assert!(east.longitude_deg() < -179.9);
        assert!(east.longitude_deg() >= -180.0);
    }

    #[test]
    fn test_haversine_matches_destination() {
        let origin = point(25.0, -80.0);
        for bearing in [0.0, 45.0, 90.0, 200.0, 315.0] {
            let dest = destination_point(origin, bearing, 1_220.0);
            assert_abs_diff_eq!(haversine_distance(origin, dest), 1_220.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_geodesic_circle_points_are_equidistant() {
        let center = point(-33.9, 18.4);
        let circle = geodesic_circle(center, 5_000.0, 36);
        assert_eq!(circle.len(), 36);
        for p in &circle {
            assert_abs_diff_eq!(haversine_distance(center, *p), 5_000.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_planar_circle_refuses_pole() {
        assert!(planar_circle(point(90.0, 0.0), 1_000.0, 8).is_err());
        assert_eq!(planar_circle(point(10.0, 0.0), 1_000.0, 8).unwrap().len(), 8);
    }

    #[test]
    fn test_region_spherical_bounds() {
        let region = compute_region(point(0.0, 0.0), 2_001, 10.0).unwrap();
        let delta_deg = (10_000.0 / EARTH_RADIUS_M).to_degrees();
        let bounds = region.bounds();
        assert_abs_diff_eq!(bounds.max_lat, delta_deg, epsilon = 1e-12);
        assert_abs_diff_eq!(bounds.min_lat, -delta_deg, epsilon = 1e-12);
        assert_abs_diff_eq!(bounds.max_lon, delta_deg, epsilon = 1e-12);
        assert_abs_diff_eq!(bounds.min_lon, -delta_deg, epsilon = 1e-12);
        assert!(!region.centering_adjusted());
    }

    #[test]
    fn test_region_even_span_adjusted() {
        let region = compute_region(point(25.0, -80.0), 244, 10.0).unwrap();
        assert_eq!(region.requested_span(), 244);
        assert_eq!(region.pixel_span(), 245);
        assert!(region.centering_adjusted());
        assert_abs_diff_eq!(region.radius_m(), 1220.0);
        assert_abs_diff_eq!(region.area_m2(), 2450.0 * 2450.0);
    }

    #[test]
    fn test_region_rejects_bad_parameters() {
        assert!(matches!(
            compute_region(point(0.0, 0.0), 0, 10.0),
            Err(EmbedError::InvalidRegion(_))
        ));
        assert!(matches!(
            compute_region(point(0.0, 0.0), 11, -1.0),
            Err(EmbedError::InvalidRegion(_))
        ));
        assert!(matches!(
            compute_region(point(0.0, 0.0), 11, f64::NAN),
            Err(EmbedError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_planar_matches_spherical_at_mid_latitude() {
        let center = point(45.0, 7.0);
        let spherical = Region::new(center, 245, &RegionParams::default()).unwrap();
        let planar = Region::new(
            center,
            245,
            &RegionParams {
                geometry: RegionGeometry::Planar,
                ..RegionParams::default()
            },
        )
        .unwrap();

        // Within a few meters of each other at 45 degrees
        let lat_m = (spherical.bounds().max_lat - planar.bounds().max_lat).abs() * METERS_PER_DEGREE;
        let lon_m = (spherical.bounds().max_lon - planar.bounds().max_lon).abs()
            * METERS_PER_DEGREE
            * center.latitude_deg().to_radians().cos();
        assert!(lat_m < 5.0, "latitude edge differs by {} m", lat_m);
        assert!(lon_m < 5.0, "longitude edge differs by {} m", lon_m);
    }

    #[test]
    fn test_spherical_region_defined_at_pole() {
        let region = compute_region(point(90.0, 0.0), 245, 10.0).unwrap();
        let reach_deg = (1220.0 / EARTH_RADIUS_M).to_degrees();
        let bounds = region.bounds();
        assert_abs_diff_eq!(bounds.min_lat, 90.0 - reach_deg, epsilon = 1e-9);
        assert_eq!(bounds.max_lat, 90.0);
        assert_eq!((bounds.min_lon, bounds.max_lon), (-180.0, 180.0));
        assert!(!region.crosses_antimeridian());

        let south = compute_region(point(-89.995, 120.0), 245, 10.0).unwrap();
        assert_eq!(south.bounds().min_lat, -90.0);
        assert!(south.bounds().max_lat > -89.995);

        let planar = Region::new(
            point(90.0, 0.0),
            245,
            &RegionParams {
                geometry: RegionGeometry::Planar,
                ..RegionParams::default()
            },
        );
        assert!(matches!(planar, Err(EmbedError::InvalidRegion(_))));
    }

    #[test]
    fn test_antimeridian_region_is_flagged() {
        let region = compute_region(point(0.0, 179.995), 245, 10.0).unwrap();
        assert!(region.crosses_antimeridian());
        assert!(region.bounds().width_deg() > 359.0);

        let inland = compute_region(point(0.0, 179.9), 245, 10.0).unwrap();
        assert!(!inland.crosses_antimeridian());
        assert!(inland.bounds().width_deg() < 0.1);
    }

    #[test]
    fn test_strategy_codes_round_trip() {
        for geometry in [RegionGeometry::Spherical, RegionGeometry::Planar] {
            assert_eq!(RegionGeometry::from_code(geometry.code()), Some(geometry));
        }
        for rule in [CornerRadius::CenteredPixel, CornerRadius::HalfSpan] {
            assert_eq!(CornerRadius::from_code(rule.code()), Some(rule));
        }
        assert_eq!(RegionGeometry::from_code(9), None);
    }
}

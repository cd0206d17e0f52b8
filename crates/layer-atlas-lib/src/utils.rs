//! Utility functions for unit and coordinate conversions
//!
//! All distance and area conversions between meters and geographic degrees go
//! through this module. They use a single linear approximation (meters per degree
//! at the equator), which ignores curvature and gets worse towards the poles.
//! Swap these functions for a geodesic calculation if precision is ever needed.

use geo::Coord;

/// Approximate length of one degree at the equator, in meters
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert a distance in meters to degrees using the linear approximation
#[inline(always)]
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Convert an area in square degrees to square meters using the linear approximation
#[inline(always)]
pub fn square_degrees_to_square_meters(area: f64) -> f64 {
    area * METERS_PER_DEGREE * METERS_PER_DEGREE
}

/// Planar (Euclidean) distance between two coordinates, in coordinate units
#[inline(always)]
pub fn planar_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Convert WGS84 (lat, lon) to Web Mercator (x, y) in meters
///
/// # Arguments
/// * `lat` - Latitude in degrees (-85.05 to 85.05)
/// * `lon` - Longitude in degrees (-180 to 180)
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Coord<f64> {
    // Clamp latitude to valid Web Mercator range
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = lon * LON_TO_X_FACTOR;
    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;

    Coord { x, y }
}

/// Convert Web Mercator (x, y) in meters to WGS84
///
/// # Returns
/// A coordinate with x = longitude and y = latitude, in degrees
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> Coord<f64> {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    Coord { x: lon, y: lat }
}

/// Check if a coordinate is within Web Mercator bounds
#[inline(always)]
pub fn is_valid_mercator(coord: Coord<f64>) -> bool {
    coord.x >= EARTH_MERCATOR_MIN
        && coord.x <= EARTH_MERCATOR_MAX
        && coord.y >= EARTH_MERCATOR_MIN
        && coord.y <= EARTH_MERCATOR_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meters_to_degrees() {
        assert!((meters_to_degrees(111_320.0) - 1.0).abs() < f64::EPSILON);
        assert!((meters_to_degrees(50.0) - 0.000_449_155).abs() < 1e-9);
    }

    #[test]
    fn test_square_degrees_roundtrip() {
        let one_degree = meters_to_degrees(METERS_PER_DEGREE);
        let area = square_degrees_to_square_meters(one_degree * one_degree);
        assert!((area - METERS_PER_DEGREE * METERS_PER_DEGREE).abs() < 1e-3);
    }

    #[test]
    fn test_planar_distance() {
        let d = planar_distance(Coord { x: 0.0, y: 0.0 }, Coord { x: 3.0, y: 4.0 });
        assert!((d - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wgs84_to_mercator_origin() {
        let point = wgs84_to_mercator(0.0, 0.0);
        assert!(point.x.abs() < 0.01);
        assert!(point.y.abs() < 0.01);
    }

    #[test]
    fn test_mercator_to_wgs84_roundtrip() {
        let lat = 48.5734;
        let lon = 7.7521;

        let mercator = wgs84_to_mercator(lat, lon);
        let back = mercator_to_wgs84(mercator.x, mercator.y);

        assert!((lat - back.y).abs() < 0.0001);
        assert!((lon - back.x).abs() < 0.0001);
    }

    #[test]
    fn test_is_valid_mercator() {
        assert!(is_valid_mercator(Coord { x: 0.0, y: 0.0 }));
        assert!(is_valid_mercator(Coord {
            x: EARTH_MERCATOR_MAX,
            y: EARTH_MERCATOR_MAX
        }));
        assert!(!is_valid_mercator(Coord {
            x: EARTH_MERCATOR_MAX + 1.0,
            y: 0.0
        }));
    }
}

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters, used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const GEOHASH_BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Default geohash cell precision for ride post origins.
pub const GEOHASH_PRECISION: usize = 9;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

pub fn to_radians(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

/// Great-circle distance between two points in meters (haversine).
pub fn geodesic_distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = to_radians(a.lat);
    let phi2 = to_radians(b.lat);
    let d_phi = to_radians(b.lat - a.lat);
    let d_lambda = to_radians(b.lng - a.lng);

    let sin_phi = (d_phi / 2.0).sin();
    let sin_lambda = (d_lambda / 2.0).sin();
    let x = sin_phi * sin_phi + phi1.cos() * phi2.cos() * sin_lambda * sin_lambda;
    let y = 2.0 * x.sqrt().atan2((1.0 - x).sqrt());

    EARTH_RADIUS_M * y
}

pub fn geodesic_distance_km(a: GeoPoint, b: GeoPoint) -> f64 {
    geodesic_distance_meters(a, b) / 1000.0
}

/// Standard base-32 geohash cell code for a point.
pub fn geohash_encode(point: GeoPoint, precision: usize) -> String {
    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lng_range = (-180.0_f64, 180.0_f64);
    let mut code = String::with_capacity(precision);
    let mut bits = 0u8;
    let mut bit_count = 0u8;
    let mut even_bit = true; // longitude first

    while code.len() < precision {
        let (range, value) = if even_bit {
            (&mut lng_range, point.lng)
        } else {
            (&mut lat_range, point.lat)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if value >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even_bit = !even_bit;
        bit_count += 1;
        if bit_count == 5 {
            code.push(GEOHASH_BASE32[bits as usize] as char);
            bits = 0;
            bit_count = 0;
        }
    }

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_one_equatorial_degree() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 1.0);
        let km = geodesic_distance_km(a, b);
        // One degree of longitude at the equator is ~111.195 km.
        assert!((km - 111.195).abs() / 111.195 < 0.02, "got {km} km");
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = GeoPoint::new(49.2488, -122.9805);
        assert_eq!(geodesic_distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = GeoPoint::new(49.2488, -122.9805);
        let b = GeoPoint::new(49.1896, -122.8499);
        let ab = geodesic_distance_meters(a, b);
        let ba = geodesic_distance_meters(b, a);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_geohash_known_vector() {
        // Reference cell from the public geohash test suite.
        let p = GeoPoint::new(57.64911, 10.40744);
        assert_eq!(geohash_encode(p, 9), "u4pruydqq");
    }

    #[test]
    fn test_geohash_respects_precision() {
        let p = GeoPoint::new(49.2488, -122.9805);
        let long = geohash_encode(p, 9);
        let short = geohash_encode(p, 5);
        assert_eq!(short.len(), 5);
        assert!(long.starts_with(&short));
    }
}

//! Geodesy helpers
//!
//! Great-circle distance for crossing proximity and lane-node accumulation,
//! forward projection of the antenna point to the bumpers, and a flat local
//! ENU projection for short-range lane geometry.

use crate::types::GeoPoint;

/// Mean Earth radius (m)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;
const METERS_PER_DEGREE_LAT: f64 = 111_320.0; // Approximate meters per degree latitude

/// Great-circle distance between two points (haversine)
///
/// # Returns
/// * Distance in meters
pub fn haversine_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Project a point `distance_m` along `bearing_deg` (0 = north, clockwise)
///
/// Negative distances project backwards along the bearing.
pub fn destination_point(origin: GeoPoint, bearing_deg: f64, distance_m: f64) -> GeoPoint {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let lat1 = origin.lat.to_radians();
    let lon1 = origin.lon.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    GeoPoint::new(lat2.to_degrees(), normalize_lon(lon2.to_degrees()))
}

/// Shortest absolute difference between two headings (0..=180 degrees)
pub fn heading_delta(a_deg: f64, b_deg: f64) -> f64 {
    let d = (a_deg - b_deg).rem_euclid(360.0);
    if d > 180.0 {
        360.0 - d
    } else {
        d
    }
}

/// Convert GPS coordinates to a local ENU frame around `reference`
///
/// # Returns
/// * `(east, north)` - Position in meters relative to reference point
pub fn to_local(point: GeoPoint, reference: GeoPoint) -> (f64, f64) {
    let north = (point.lat - reference.lat) * METERS_PER_DEGREE_LAT;
    let east = (point.lon - reference.lon) * METERS_PER_DEGREE_LAT * reference.lat.to_radians().cos();
    (east, north)
}

fn normalize_lon(lon: f64) -> f64 {
    (lon + 540.0).rem_euclid(360.0) - 180.0
}

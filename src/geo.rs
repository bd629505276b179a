//! Great-circle distance between two coordinates.

use crate::types::Coordinate;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres, rounded to 2 decimal places.
///
/// Pure and total. Callers with a missing coordinate must not reach for a
/// made-up point here; the fallback distance is a pricing policy decision
/// and lives in [`crate::pricing`].
pub fn distance_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();

    round_2dp(EARTH_RADIUS_KM * c)
}

fn round_2dp(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

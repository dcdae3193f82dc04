//! Utility functions for status messages and spatial helpers

/// Earth's radius in meters
const EARTH_RADIUS_M: f64 = 6371000.0;

/// `"1 cache"`, `"3 caches"`
pub fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Join count phrases, skipping zero counts: `"3 caches and 1 waypoint"`
///
/// Returns `None` when every count is zero.
pub fn count_phrase(parts: &[(usize, &str, &str)]) -> Option<String> {
    let phrases: Vec<String> = parts
        .iter()
        .filter(|(count, _, _)| *count > 0)
        .map(|(count, singular, many)| plural(*count, singular, many))
        .collect();

    match phrases.len() {
        0 => None,
        1 => Some(phrases[0].clone()),
        n => Some(format!("{} and {}", phrases[..n - 1].join(", "), phrases[n - 1])),
    }
}

/// Haversine distance between two (lat, lon) positions in meters
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Check that a latitude/longitude pair is on the globe
#[inline]
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

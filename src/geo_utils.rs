//! Geographic utilities: great-circle distance and human-readable formatting.
//!
//! The same distance primitive backs the live tracking distance readout and
//! nearby-trek search, so both always agree on what "3.3km" means.

use chrono::Duration;

use crate::GpsPoint;

/// Earth's radius in meters
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Default off-route threshold in meters
pub const DEFAULT_DEVIATION_THRESHOLD_METERS: f64 = 100.0;

/// Convert degrees to radians.
#[inline]
pub fn to_radians(degrees: f64) -> f64 {
    degrees * (std::f64::consts::PI / 180.0)
}

/// Haversine distance between two points in meters.
///
/// # Example
/// ```
/// use trek_tracker::{haversine_distance, GpsPoint};
/// let a = GpsPoint::new(18.5204, 73.8567);
/// assert_eq!(haversine_distance(&a, &a), 0.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = to_radians(p1.latitude);
    let lat2 = to_radians(p2.latitude);
    let dlat = to_radians(p2.latitude - p1.latitude);
    let dlon = to_radians(p2.longitude - p1.longitude);

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Haversine distance between two points in kilometers.
#[inline]
pub fn haversine_km(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    haversine_distance(p1, p2) / 1000.0
}

/// Sum of haversine distances over consecutive points, in meters.
pub fn path_distance(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Format a distance in kilometers for display.
///
/// - below 1 km: whole meters, `"500m"`
/// - 1 km up to 10 km: one decimal, `"3.3km"`
/// - 10 km and above: whole kilometers, `"42km"`
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{}m", (km * 1000.0).round() as i64)
    } else if km < 10.0 {
        format!("{:.1}km", km)
    } else {
        format!("{}km", km.round() as i64)
    }
}

/// Format an elapsed duration as `HH:MM:SS`. Negative durations clamp to zero.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Convert meters per second to kilometers per hour.
#[inline]
pub fn mps_to_kmh(speed: f64) -> f64 {
    speed * 3.6
}

/// Minimum distance in meters from `position` to any point of `route`.
///
/// Returns `None` for an empty route.
pub fn distance_to_route(position: &GpsPoint, route: &[GpsPoint]) -> Option<f64> {
    route
        .iter()
        .map(|p| haversine_distance(position, p))
        .min_by(f64::total_cmp)
}

/// Whether `position` is more than `threshold_meters` away from every point of `route`.
///
/// An empty route never reports a deviation.
pub fn is_off_route(position: &GpsPoint, route: &[GpsPoint], threshold_meters: f64) -> bool {
    distance_to_route(position, route).is_some_and(|d| d > threshold_meters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_known_value() {
        // Pune to Mumbai is roughly 120 km as the crow flies
        let pune = GpsPoint::new(18.5204, 73.8567);
        let mumbai = GpsPoint::new(19.0760, 72.8777);
        let dist = haversine_distance(&pune, &mumbai);
        assert!(approx_eq(dist, 120_000.0, 5_000.0), "got {}", dist);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = GpsPoint::new(18.5204, 73.8567);
        let b = GpsPoint::new(18.5210, 73.8570);
        assert!(approx_eq(
            haversine_distance(&a, &b),
            haversine_distance(&b, &a),
            1e-9
        ));
    }

    #[test]
    fn test_format_distance_bands() {
        assert_eq!(format_distance(0.5), "500m");
        assert_eq!(format_distance(0.0), "0m");
        assert_eq!(format_distance(3.27), "3.3km");
        assert_eq!(format_distance(1.0), "1.0km");
        assert_eq!(format_distance(9.94), "9.9km");
        assert_eq!(format_distance(42.0), "42km");
        assert_eq!(format_distance(10.4), "10km");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(0)), "00:00:00");
        assert_eq!(format_duration(Duration::seconds(3_725)), "01:02:05");
        assert_eq!(format_duration(Duration::seconds(-5)), "00:00:00");
    }

    #[test]
    fn test_route_deviation() {
        let route = vec![GpsPoint::new(18.5204, 73.8567), GpsPoint::new(18.5304, 73.8567)];
        let on_route = GpsPoint::new(18.5205, 73.8567);
        let off_route = GpsPoint::new(18.5204, 73.8667);

        assert!(!is_off_route(&on_route, &route, DEFAULT_DEVIATION_THRESHOLD_METERS));
        assert!(is_off_route(&off_route, &route, DEFAULT_DEVIATION_THRESHOLD_METERS));
        assert!(!is_off_route(&off_route, &[], DEFAULT_DEVIATION_THRESHOLD_METERS));
        assert_eq!(distance_to_route(&on_route, &[]), None);
    }

    #[test]
    fn test_path_distance_matches_pairwise_sum() {
        let points = vec![
            GpsPoint::new(18.5204, 73.8567),
            GpsPoint::new(18.5210, 73.8570),
            GpsPoint::new(18.5220, 73.8580),
        ];
        let expected = haversine_distance(&points[0], &points[1])
            + haversine_distance(&points[1], &points[2]);
        assert!(approx_eq(path_distance(&points), expected, 1e-9));
    }
}

//! Great-circle distance on a spherical Earth.

use potholes_types::GeoPoint;

/// Mean Earth radius in meters used by every distance computation.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points, in meters.
///
/// The arcsine argument is clamped to `[0, 1]` so floating-point overshoot
/// near antipodal points never leaves the function's domain.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let half_chord = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * half_chord.sqrt().clamp(0.0, 1.0).asin()
}

/// Total length of a path visiting `points` in order, in meters.
///
/// Zero for fewer than two points.
pub fn path_length_meters(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .filter_map(|pair| match pair {
            [from, to] => Some(haversine_meters(*from, *to)),
            _ => None,
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(actual: f64, expected: f64, tolerance: f64) -> bool {
        (actual - expected).abs() <= tolerance
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let p = GeoPoint::new(12.9716, 77.5946);
        assert!(haversine_meters(p, p).abs() < 1e-9);
    }

    #[test]
    fn berlin_to_paris_matches_reference() {
        let berlin = GeoPoint::new(52.5200, 13.4050);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let d = haversine_meters(berlin, paris);
        assert!(close(d, 877_460.0, 877.0), "got {d}");
    }

    #[test]
    fn ten_meter_scale_is_accurate() {
        // 0.00009 deg of latitude is 10.007 m on the reference sphere.
        let a = GeoPoint::new(12.0, 77.0);
        let b = GeoPoint::new(12.000_09, 77.0);
        let d = haversine_meters(a, b);
        assert!(close(d, 10.007_5, 0.01), "got {d}");
    }

    #[test]
    fn antipodal_points_do_not_produce_nan() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 180.0);
        let d = haversine_meters(a, b);
        assert!(d.is_finite());
        assert!(close(d, core::f64::consts::PI * EARTH_RADIUS_M, 1.0));
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(-33.86, 151.21);
        let b = GeoPoint::new(-33.87, 151.20);
        assert!(close(haversine_meters(a, b), haversine_meters(b, a), 1e-9));
    }

    #[test]
    fn path_length_sums_legs() {
        let a = GeoPoint::new(12.0, 77.0);
        let b = GeoPoint::new(12.001, 77.0);
        let c = GeoPoint::new(12.002, 77.0);
        let total = path_length_meters(&[a, b, c]);
        let expected = haversine_meters(a, b) + haversine_meters(b, c);
        assert!(close(total, expected, 1e-9));
        assert!(path_length_meters(&[a]).abs() < f64::EPSILON);
        assert!(path_length_meters(&[]).abs() < f64::EPSILON);
    }
}

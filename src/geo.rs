//! Geographic distance math for candidate matching
//!
//! Distances use the haversine great-circle formula over a spherical earth
//! (R = 6371 km), which is well within tolerance at the city scale this
//! service operates at. Ranking always uses full precision; `round1` exists
//! only for display.

use serde::{Deserialize, Serialize};

/// Mean earth radius in kilometers
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and inside the WGS84 range
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance between two points in kilometers
pub fn distance_km(a: LatLng, b: LatLng) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Whether `point` lies within `radius_km` of `center` (boundary inclusive)
pub fn within_radius(center: LatLng, point: LatLng, radius_km: f64) -> bool {
    distance_km(center, point) <= radius_km
}

/// Convert a kilometer radius to the angular radians `$centerSphere` expects
pub fn radius_to_radians(radius_km: f64) -> f64 {
    radius_km / EARTH_RADIUS_KM
}

/// Round a distance to one decimal for display
pub fn round1(km: f64) -> f64 {
    (km * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Degrees of latitude that cover roughly `km` kilometers north-south
    fn lat_offset_for_km(km: f64) -> f64 {
        km / EARTH_RADIUS_KM * 180.0 / std::f64::consts::PI
    }

    #[test]
    fn test_zero_distance_for_identical_points() {
        let p = LatLng::new(19.0760, 72.8777);
        assert!(distance_km(p, p) < 1e-9);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = LatLng::new(19.0760, 72.8777);
        let b = LatLng::new(19.4000, 72.8000);
        let forward = distance_km(a, b);
        let backward = distance_km(b, a);
        assert!((forward - backward).abs() < 1e-9);
    }

    #[test]
    fn test_known_short_hop_in_mumbai() {
        let center = LatLng::new(19.0760, 72.8777);
        let nearby = LatLng::new(19.0825, 72.8900);
        let d = distance_km(center, nearby);
        // Roughly a kilometer and a half across the city
        assert!(d > 1.3 && d < 1.6, "unexpected distance {}", d);
    }

    #[test]
    fn test_pure_latitude_offsets_are_exact() {
        let center = LatLng::new(10.0, 20.0);
        for km in [2.0, 9.0, 11.0, 15.0] {
            let point = LatLng::new(10.0 + lat_offset_for_km(km), 20.0);
            let d = distance_km(center, point);
            assert!((d - km).abs() < 0.01, "wanted {} got {}", km, d);
        }
    }

    #[test]
    fn test_radius_membership_is_boundary_inclusive() {
        let center = LatLng::new(0.0, 0.0);
        let on_edge = LatLng::new(lat_offset_for_km(10.0), 0.0);

        // A radius exactly equal to the distance still matches
        let d = distance_km(center, on_edge);
        assert!(within_radius(center, on_edge, d));
        assert!(!within_radius(center, on_edge, d - 0.001));

        let outside = LatLng::new(lat_offset_for_km(10.02), 0.0);
        assert!(!within_radius(center, outside, 10.0));
    }

    #[test]
    fn test_radius_to_radians_matches_earth_radius() {
        assert!((radius_to_radians(EARTH_RADIUS_KM) - 1.0).abs() < 1e-12);
        assert!((radius_to_radians(10.0) - 10.0 / 6371.0).abs() < 1e-12);
    }

    #[test]
    fn test_round1_display_rounding() {
        assert_eq!(round1(1.449), 1.4);
        assert_eq!(round1(1.45), 1.5);
        assert_eq!(round1(0.04), 0.0);
        assert_eq!(round1(12.0), 12.0);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(LatLng::new(90.0, 180.0).is_valid());
        assert!(LatLng::new(-90.0, -180.0).is_valid());
        assert!(!LatLng::new(90.1, 0.0).is_valid());
        assert!(!LatLng::new(0.0, 180.5).is_valid());
        assert!(!LatLng::new(f64::NAN, 0.0).is_valid());
    }
}

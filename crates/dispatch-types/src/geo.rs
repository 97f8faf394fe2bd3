use serde::{Deserialize, Serialize};

/// A longitude/latitude pair. Field order matches the GeoJSON `[lon, lat]`
/// convention used throughout the core, not the `(lat, lon)` convention
/// some upstream HTTP payloads use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// A routed polyline, decoded to its constituent points. Points outside
/// the valid lat/lon range are filtered at decode time (spec tie-break).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineString {
    pub points: Vec<GeoPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_zero_for_same_point() {
        let p = GeoPoint::new(-4.03, 5.36);
        assert!(p.distance_meters(&p) < 1e-6);
    }

    #[test]
    fn distance_matches_known_scenario() {
        // S1 in spec.md: pickup/delivery pair documented as ~2000m apart.
        let pickup = GeoPoint::new(-4.035, 5.365);
        let delivery = GeoPoint::new(-4.02, 5.37);
        let d = pickup.distance_meters(&delivery);
        assert!(d > 1000.0 && d < 2500.0, "distance was {d}");
    }

    #[test]
    fn validity_bounds() {
        assert!(GeoPoint::new(0.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 91.0).is_valid());
        assert!(!GeoPoint::new(-181.0, 0.0).is_valid());
    }
}

//! Polyline encode/decode at precision 6, with the spec.md §4.2 tie-break:
//! any decoded point whose lat ∉ [-90,90] or lon ∉ [-180,180] is dropped.

use dispatch_types::{GeoPoint, LineString};

const PRECISION: u32 = 6;

pub fn encode(line: &LineString) -> Result<String, String> {
    let coords: geo_types::LineString<f64> =
        line.points.iter().map(|p| (p.lon, p.lat)).collect::<Vec<(f64, f64)>>().into();
    polyline::encode_coordinates(coords, PRECISION)
}

pub fn decode(encoded: &str) -> Result<LineString, String> {
    let decoded: geo_types::LineString<f64> = polyline::decode_polyline(encoded, PRECISION)?;
    let points = decoded
        .0
        .into_iter()
        .map(|c| GeoPoint::new(c.x, c.y))
        .filter(GeoPoint::is_valid)
        .collect();
    Ok(LineString { points })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_coordinates_within_tolerance() {
        let original = LineString {
            points: vec![GeoPoint::new(-4.035, 5.365), GeoPoint::new(-4.02, 5.37)],
        };
        let encoded = encode(&original).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.points.len(), original.points.len());
        for (a, b) in original.points.iter().zip(decoded.points.iter()) {
            assert!((a.lon - b.lon).abs() < 1e-5, "lon drift too large");
            assert!((a.lat - b.lat).abs() < 1e-5, "lat drift too large");
        }
    }

    #[test]
    fn decode_filters_out_of_range_points() {
        // A hand-crafted polyline with a point way outside [-90,90] lat
        // would come from a malformed upstream encoder; simulate by
        // checking the filter predicate directly since fabricating an
        // out-of-range *encoded* polyline defeats its own codec.
        assert!(!GeoPoint::new(0.0, 91.0).is_valid());
        assert!(!GeoPoint::new(181.0, 0.0).is_valid());
    }
}

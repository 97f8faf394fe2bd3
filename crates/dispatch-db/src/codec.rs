//! Small conversions between the flat column shapes Postgres stores and
//! the richer enums/value objects `dispatch-types` exposes. Kept
//! centralized so every repository maps the same way.

use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::GeoPoint;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Unit-variant enums in `dispatch-types` are `#[serde(rename_all =
/// "snake_case")]`, so serializing to a JSON string gives exactly the
/// TEXT column value we store.
pub fn enum_to_text<T: Serialize>(value: &T) -> DispatchResult<String> {
    match serde_json::to_value(value).map_err(|e| DispatchError::Unrecoverable(e.to_string()))? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DispatchError::Unrecoverable(format!("expected string enum encoding, got {other}"))),
    }
}

pub fn text_to_enum<T: DeserializeOwned>(text: &str) -> DispatchResult<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string()))
        .map_err(|e| DispatchError::Unrecoverable(format!("unrecognized enum value {text:?}: {e}")))
}

pub fn point_to_columns(point: Option<GeoPoint>) -> (Option<f64>, Option<f64>) {
    match point {
        Some(p) => (Some(p.lon), Some(p.lat)),
        None => (None, None),
    }
}

pub fn columns_to_point(lon: Option<f64>, lat: Option<f64>) -> Option<GeoPoint> {
    match (lon, lat) {
        (Some(lon), Some(lat)) => Some(GeoPoint::new(lon, lat)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::DriverStatus;

    #[test]
    fn enum_round_trips_through_text() {
        let text = enum_to_text(&DriverStatus::OnBreak).unwrap();
        assert_eq!(text, "on_break");
        let back: DriverStatus = text_to_enum(&text).unwrap();
        assert_eq!(back, DriverStatus::OnBreak);
    }

    #[test]
    fn unknown_text_is_rejected() {
        let result: DispatchResult<DriverStatus> = text_to_enum("not_a_status");
        assert!(result.is_err());
    }

    #[test]
    fn point_columns_round_trip() {
        let p = GeoPoint::new(-4.02, 5.37);
        let (lon, lat) = point_to_columns(Some(p));
        assert_eq!(columns_to_point(lon, lat), Some(p));
        assert_eq!(columns_to_point(None, Some(1.0)), None);
    }
}

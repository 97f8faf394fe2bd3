//! The `Routing` capability interface from spec.md §4.2. Geocoding and
//! routing engines (Nominatim/Valhalla) are out of scope (§1); this crate
//! only defines the contract the core consumes, a polyline codec, and an
//! HTTP-backed adapter stub plus a deterministic test double.

use std::time::Duration;

use async_trait::async_trait;
use dispatch_common::DispatchError;
use dispatch_types::{GeoPoint, LineString, Maneuver};
use serde::{Deserialize, Serialize};

pub mod polyline_codec;

pub const GEOCODE_TIMEOUT: Duration = Duration::from_secs(30);
pub const ROUTING_TIMEOUT: Duration = Duration::from_secs(20);
pub const MATRIX_TIMEOUT: Duration = Duration::from_secs(7);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Costing {
    Auto,
    Bicycle,
    Pedestrian,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub point: GeoPoint,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLegResult {
    pub geometry: LineString,
    pub duration_seconds: f64,
    pub distance_meters: f64,
    pub maneuvers: Vec<Maneuver>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripResult {
    pub total_duration_seconds: f64,
    pub total_distance_meters: f64,
    pub legs: Vec<RouteLegResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectRouteResult {
    pub duration_seconds: f64,
    pub distance_meters: f64,
    pub geometry: LineString,
}

#[async_trait]
pub trait Routing: Send + Sync {
    async fn geocode(&self, text: &str) -> Result<Option<GeocodeResult>, DispatchError>;
    async fn trip(&self, waypoints: &[GeoPoint], costing: Costing) -> Result<Option<TripResult>, DispatchError>;
    async fn direct_route(&self, start: GeoPoint, end: GeoPoint, costing: Costing) -> Result<Option<DirectRouteResult>, DispatchError>;
}

/// Deterministic test double: straight-line distance, no network calls.
/// Used by assignment/mission tests and as a local-dev fallback.
pub struct NullRouting;

#[async_trait]
impl Routing for NullRouting {
    async fn geocode(&self, _text: &str) -> Result<Option<GeocodeResult>, DispatchError> {
        Ok(Some(GeocodeResult {
            point: GeoPoint::new(0.0, 0.0),
            city: None,
            postcode: None,
            country: None,
        }))
    }

    async fn trip(&self, waypoints: &[GeoPoint], _costing: Costing) -> Result<Option<TripResult>, DispatchError> {
        if waypoints.len() < 2 {
            return Ok(None);
        }
        let mut legs = Vec::new();
        let mut total_distance = 0.0;
        let mut total_duration = 0.0;
        for pair in waypoints.windows(2) {
            let distance = pair[0].distance_meters(&pair[1]);
            // Assume an average urban speed of 30 km/h for the synthetic leg duration.
            let duration = distance / (30_000.0 / 3600.0);
            total_distance += distance;
            total_duration += duration;
            legs.push(RouteLegResult {
                geometry: LineString { points: vec![pair[0], pair[1]] },
                duration_seconds: duration,
                distance_meters: distance,
                maneuvers: vec![],
            });
        }
        Ok(Some(TripResult { total_duration_seconds: total_duration, total_distance_meters: total_distance, legs }))
    }

    async fn direct_route(&self, start: GeoPoint, end: GeoPoint, _costing: Costing) -> Result<Option<DirectRouteResult>, DispatchError> {
        let distance = start.distance_meters(&end);
        let duration = distance / (30_000.0 / 3600.0);
        Ok(Some(DirectRouteResult {
            duration_seconds: duration,
            distance_meters: distance,
            geometry: LineString { points: vec![start, end] },
        }))
    }
}

/// Adapter stub for a real Valhalla/OSRM-style HTTP routing engine. The
/// actual engine is out of scope (spec.md §1); this wires the timeout
/// discipline from §5 around whichever base URL is configured.
pub struct HttpRouting {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRouting {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }
}

#[async_trait]
impl Routing for HttpRouting {
    async fn geocode(&self, text: &str) -> Result<Option<GeocodeResult>, DispatchError> {
        let url = format!("{}/search?q={}", self.base_url, urlencode(text));
        let fut = self.client.get(&url).send();
        match tokio::time::timeout(GEOCODE_TIMEOUT, fut).await {
            Ok(Ok(resp)) => resp
                .json::<Option<GeocodeResult>>()
                .await
                .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string())),
            Ok(Err(e)) => Err(DispatchError::UpstreamUnavailable(e.to_string())),
            Err(_) => Err(DispatchError::UpstreamUnavailable("geocode timed out".into())),
        }
    }

    async fn trip(&self, waypoints: &[GeoPoint], _costing: Costing) -> Result<Option<TripResult>, DispatchError> {
        let url = format!("{}/route", self.base_url);
        let body = serde_json::json!({ "waypoints": waypoints });
        let fut = self.client.post(&url).json(&body).send();
        match tokio::time::timeout(ROUTING_TIMEOUT, fut).await {
            Ok(Ok(resp)) => resp
                .json::<Option<TripResult>>()
                .await
                .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string())),
            Ok(Err(e)) => Err(DispatchError::UpstreamUnavailable(e.to_string())),
            Err(_) => Err(DispatchError::UpstreamUnavailable("trip timed out".into())),
        }
    }

    async fn direct_route(&self, start: GeoPoint, end: GeoPoint, _costing: Costing) -> Result<Option<DirectRouteResult>, DispatchError> {
        let url = format!("{}/route", self.base_url);
        let body = serde_json::json!({ "start": start, "end": end });
        let fut = self.client.post(&url).json(&body).send();
        match tokio::time::timeout(MATRIX_TIMEOUT, fut).await {
            Ok(Ok(resp)) => resp
                .json::<Option<DirectRouteResult>>()
                .await
                .map_err(|e| DispatchError::UpstreamUnavailable(e.to_string())),
            Ok(Err(e)) => Err(DispatchError::UpstreamUnavailable(e.to_string())),
            Err(_) => Err(DispatchError::UpstreamUnavailable("direct_route timed out".into())),
        }
    }
}

fn urlencode(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_routing_trip_sums_legs() {
        let routing = NullRouting;
        let waypoints = vec![GeoPoint::new(-4.035, 5.365), GeoPoint::new(-4.02, 5.37)];
        let trip = routing.trip(&waypoints, Costing::Auto).await.unwrap().unwrap();
        assert_eq!(trip.legs.len(), 1);
        assert!(trip.total_distance_meters > 0.0);
    }

    #[tokio::test]
    async fn null_routing_requires_at_least_two_waypoints() {
        let routing = NullRouting;
        let trip = routing.trip(&[GeoPoint::new(0.0, 0.0)], Costing::Auto).await.unwrap();
        assert!(trip.is_none());
    }
}

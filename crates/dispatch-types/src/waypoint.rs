use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{GeoPoint, LineString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointType {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointStatus {
    Pending,
    Arrived,
    Processing,
    Completed,
    Skipped,
    Failed,
}

impl WaypointStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WaypointStatus::Completed | WaypointStatus::Skipped | WaypointStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaypointSummaryItem {
    pub sequence: u32,
    pub waypoint_type: WaypointType,
    pub address_id: Uuid,
    pub coordinates: GeoPoint,
    pub status: WaypointStatus,
    /// 6-digit decimal string, generated from a cryptographic RNG at
    /// waypoint creation. Never logged (see dispatch-mission).
    pub confirmation_code: String,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub photo_urls: Vec<String>,
    pub name: Option<String>,
    pub is_mandatory: bool,
    pub message_issue: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Maneuver {
    pub instruction: String,
    pub distance_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRouteLeg {
    pub order_id: Uuid,
    pub leg_sequence: u32,
    pub start_address_id: Option<Uuid>,
    pub end_address_id: Option<Uuid>,
    pub start_coordinates: GeoPoint,
    pub end_coordinates: GeoPoint,
    pub geometry: LineString,
    pub duration_seconds: f64,
    pub distance_meters: f64,
    pub maneuvers: Vec<Maneuver>,
}

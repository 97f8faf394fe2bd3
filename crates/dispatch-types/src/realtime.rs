use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::order::OrderStatusLogEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TrackStreamPayload {
    #[serde(rename = "order:status_updated")]
    StatusUpdated {
        order_id: Uuid,
        client_id: Uuid,
        new_status: String,
        timestamp: DateTime<Utc>,
        log_entry: Option<OrderStatusLogEntry>,
    },
    #[serde(rename = "order:driver_location_updated")]
    DriverLocationUpdated {
        order_id: Uuid,
        client_id: Uuid,
        driver_id: Uuid,
        location: GeoPoint,
        timestamp: DateTime<Utc>,
        eta_seconds: Option<f64>,
    },
}

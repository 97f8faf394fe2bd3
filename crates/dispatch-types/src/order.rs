use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::waypoint::WaypointSummaryItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    Med,
    High,
}

/// Not persisted as a column: derivable from `driver_id`/`offered_driver_id`
/// and the terminal reason codes, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPhase {
    Pending,
    Offered,
    Accepted,
    Success,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub company_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub priority: OrderPriority,
    pub remuneration: i64,
    pub client_fee: i64,
    pub currency: String,
    pub pickup_address_id: Uuid,
    pub delivery_address_id: Uuid,
    pub note: Option<String>,
    pub assignment_attempt_count: u32,
    pub calculation_engine: String,
    pub offered_driver_id: Option<Uuid>,
    pub offer_expires_at: Option<DateTime<Utc>>,
    pub delivery_date: NaiveDate,
    pub delivery_date_estimation: Option<NaiveDate>,
    pub cancellation_reason_code: Option<String>,
    pub failure_reason_code: Option<String>,
    pub waypoints_summary: Vec<WaypointSummaryItem>,
    /// Drivers who have already refused or let an offer expire on this
    /// order; excluded from future candidate pools for its lifetime.
    pub blacklisted_driver_ids: Vec<Uuid>,
}

impl Order {
    pub fn phase(&self) -> OrderPhase {
        if self.cancellation_reason_code.is_some() {
            return OrderPhase::Cancelled;
        }
        if self.failure_reason_code.is_some() {
            return if self.waypoints_summary.iter().any(|w| w.status.is_terminal() && matches!(w.status, crate::waypoint::WaypointStatus::Completed)) {
                OrderPhase::PartiallyCompleted
            } else {
                OrderPhase::Failed
            };
        }
        if self.driver_id.is_some() {
            if self.waypoints_summary.iter().all(|w| matches!(w.status, crate::waypoint::WaypointStatus::Completed)) && !self.waypoints_summary.is_empty() {
                return OrderPhase::Success;
            }
            return OrderPhase::Accepted;
        }
        if self.offered_driver_id.is_some() {
            return OrderPhase::Offered;
        }
        OrderPhase::Pending
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.phase(),
            OrderPhase::Success | OrderPhase::PartiallyCompleted | OrderPhase::Failed | OrderPhase::Cancelled
        )
    }

    /// `spec.md` §8 invariant: never both an assignment and a live offer.
    pub fn has_consistent_assignment_state(&self) -> bool {
        !(self.driver_id.is_some() && self.offered_driver_id.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusLogMetadata {
    pub waypoint_sequence: Option<u32>,
    pub waypoint_type: Option<String>,
    pub waypoint_status: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusLogEntry {
    pub order_id: Uuid,
    pub status: String,
    pub changed_at: DateTime<Utc>,
    pub changed_by_user_id: Option<Uuid>,
    pub current_location: Option<crate::geo::GeoPoint>,
    pub metadata: OrderStatusLogMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;
    use crate::waypoint::{WaypointStatus, WaypointSummaryItem, WaypointType};

    fn base_order() -> Order {
        Order {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            company_id: None,
            driver_id: None,
            priority: OrderPriority::Med,
            remuneration: 0,
            client_fee: 0,
            currency: "XOF".into(),
            pickup_address_id: Uuid::new_v4(),
            delivery_address_id: Uuid::new_v4(),
            note: None,
            assignment_attempt_count: 0,
            calculation_engine: "v1".into(),
            offered_driver_id: None,
            offer_expires_at: None,
            delivery_date: chrono::Utc::now().date_naive(),
            delivery_date_estimation: None,
            cancellation_reason_code: None,
            failure_reason_code: None,
            waypoints_summary: vec![],
            blacklisted_driver_ids: vec![],
        }
    }

    #[test]
    fn fresh_order_is_pending() {
        assert_eq!(base_order().phase(), OrderPhase::Pending);
    }

    #[test]
    fn offered_order_phase() {
        let mut o = base_order();
        o.offered_driver_id = Some(Uuid::new_v4());
        assert_eq!(o.phase(), OrderPhase::Offered);
    }

    #[test]
    fn cancelled_wins_over_everything() {
        let mut o = base_order();
        o.driver_id = Some(Uuid::new_v4());
        o.cancellation_reason_code = Some("no_driver_available".into());
        assert_eq!(o.phase(), OrderPhase::Cancelled);
        assert!(o.is_terminal());
    }

    #[test]
    fn both_driver_and_offer_set_is_inconsistent() {
        let mut o = base_order();
        o.driver_id = Some(Uuid::new_v4());
        o.offered_driver_id = Some(Uuid::new_v4());
        assert!(!o.has_consistent_assignment_state());
    }

    #[test]
    fn all_completed_waypoints_is_success() {
        let mut o = base_order();
        o.driver_id = Some(Uuid::new_v4());
        o.waypoints_summary = vec![WaypointSummaryItem {
            sequence: 0,
            waypoint_type: WaypointType::Pickup,
            address_id: Uuid::new_v4(),
            coordinates: GeoPoint::new(0.0, 0.0),
            status: WaypointStatus::Completed,
            confirmation_code: "123456".into(),
            start_at: None,
            end_at: None,
            photo_urls: vec![],
            name: None,
            is_mandatory: true,
            message_issue: None,
        }];
        assert_eq!(o.phase(), OrderPhase::Success);
    }
}

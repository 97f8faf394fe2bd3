//! The waypoint mission state machine from spec.md §4.5. Pure library, no
//! I/O: callers (the HTTP boundary for driver-facing transitions, the
//! assignment engine for terminal-state reactions) own persistence.

pub mod confirmation;

use chrono::{DateTime, Utc};
use dispatch_common::DispatchError;
use dispatch_types::{Order, WaypointStatus, WaypointSummaryItem};

#[derive(Debug, Clone)]
pub enum WaypointAction {
    /// driver reports arrival at the waypoint.
    Arrive,
    /// confirmation-code exchange begins.
    BeginProcessing,
    /// all required photos uploaded, code validated, optional signature.
    Complete { presented_code: String, photo_urls: Vec<String> },
    /// terminal failure; requires an operator-supplied reason.
    Fail { message_issue: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionOutcome {
    InProgress,
    Success { final_remuneration: i64 },
    PartiallyCompleted { final_remuneration: i64 },
    Failed { failure_reason_code: String },
}

fn previous_waypoint_cleared(order: &Order, sequence: u32) -> bool {
    if sequence == 0 {
        return true;
    }
    order
        .waypoints_summary
        .iter()
        .find(|w| w.sequence == sequence - 1)
        .map(|w| matches!(w.status, WaypointStatus::Completed | WaypointStatus::Skipped))
        .unwrap_or(false)
}

fn find_waypoint_mut(order: &mut Order, sequence: u32) -> Result<&mut WaypointSummaryItem, DispatchError> {
    order
        .waypoints_summary
        .iter_mut()
        .find(|w| w.sequence == sequence)
        .ok_or_else(|| DispatchError::NotFound(format!("waypoint {sequence} not found")))
}

/// Applies a single waypoint transition, enforcing spec.md §4.5's diagram
/// and the `sequence`-monotonic serialization rule from §5. Returns the
/// `OrderStatusLog` status string to emit, if any.
pub fn apply_waypoint_transition(
    order: &mut Order,
    requesting_driver_id: uuid::Uuid,
    sequence: u32,
    action: WaypointAction,
    now: DateTime<Utc>,
) -> Result<Option<&'static str>, DispatchError> {
    if order.driver_id != Some(requesting_driver_id) {
        return Err(DispatchError::Authorization("waypoint does not belong to this driver's mission".into()));
    }

    match action {
        WaypointAction::Arrive => {
            if !previous_waypoint_cleared(order, sequence) {
                return Err(DispatchError::Conflict("previous waypoint is not completed or skipped".into()));
            }
            let waypoint_type;
            {
                let waypoint = find_waypoint_mut(order, sequence)?;
                if waypoint.status != WaypointStatus::Pending {
                    return Err(DispatchError::Conflict(format!(
                        "waypoint {sequence} is not pending (current: {:?})",
                        waypoint.status
                    )));
                }
                waypoint.status = WaypointStatus::Arrived;
                waypoint.start_at = Some(now);
                waypoint_type = waypoint.waypoint_type;
            }
            Ok(Some(match waypoint_type {
                dispatch_types::WaypointType::Pickup => "AT_PICKUP",
                dispatch_types::WaypointType::Delivery => "AT_DELIVERY_LOCATION",
            }))
        }

        WaypointAction::BeginProcessing => {
            let waypoint = find_waypoint_mut(order, sequence)?;
            if waypoint.status != WaypointStatus::Arrived {
                return Err(DispatchError::Conflict(format!(
                    "waypoint {sequence} is not arrived (current: {:?})",
                    waypoint.status
                )));
            }
            waypoint.status = WaypointStatus::Processing;
            Ok(None)
        }

        WaypointAction::Complete { presented_code, photo_urls } => {
            let has_next_delivery;
            {
                let waypoint = find_waypoint_mut(order, sequence)?;
                if waypoint.status != WaypointStatus::Processing {
                    return Err(DispatchError::Conflict(format!(
                        "waypoint {sequence} is not processing (current: {:?})",
                        waypoint.status
                    )));
                }
                if !confirmation::codes_match(&waypoint.confirmation_code, &presented_code) {
                    return Err(DispatchError::Validation("confirmation code does not match".into()));
                }
                if waypoint.is_mandatory && photo_urls.is_empty() {
                    return Err(DispatchError::Validation("required photos were not provided".into()));
                }
                waypoint.status = WaypointStatus::Completed;
                waypoint.end_at = Some(now);
                waypoint.photo_urls = photo_urls;
            }
            has_next_delivery = order
                .waypoints_summary
                .iter()
                .any(|w| w.sequence == sequence + 1 && w.waypoint_type == dispatch_types::WaypointType::Delivery);
            Ok(has_next_delivery.then_some("EN_ROUTE_TO_DELIVERY"))
        }

        WaypointAction::Fail { message_issue } => {
            let waypoint = find_waypoint_mut(order, sequence)?;
            if waypoint.status.is_terminal() {
                return Err(DispatchError::Conflict(format!("waypoint {sequence} is already terminal")));
            }
            if message_issue.trim().is_empty() {
                return Err(DispatchError::Validation("message_issue is required to fail a waypoint".into()));
            }
            waypoint.status = WaypointStatus::Failed;
            waypoint.end_at = Some(now);
            waypoint.message_issue = Some(message_issue);
            Ok(None)
        }
    }
}

/// Derives the mission-level terminal outcome from the waypoint set, per
/// spec.md §4.5. `base_remuneration` is the order's agreed
/// `driver_remuneration`; proration on partial completion uses integer
/// division, as specified.
pub fn derive_mission_outcome(order: &Order, base_remuneration: i64) -> MissionOutcome {
    let total = order.waypoints_summary.len() as i64;
    if total == 0 {
        return MissionOutcome::InProgress;
    }

    let completed = order
        .waypoints_summary
        .iter()
        .filter(|w| w.status == WaypointStatus::Completed)
        .count() as i64;
    let failed = order.waypoints_summary.iter().any(|w| w.status == WaypointStatus::Failed);
    let all_terminal = order.waypoints_summary.iter().all(|w| w.status.is_terminal());

    if completed == total {
        return MissionOutcome::Success { final_remuneration: base_remuneration };
    }

    if failed && completed > 0 {
        return MissionOutcome::PartiallyCompleted {
            final_remuneration: base_remuneration * completed / total,
        };
    }

    if all_terminal {
        let reason = order
            .waypoints_summary
            .iter()
            .find(|w| w.status == WaypointStatus::Failed)
            .and_then(|w| w.message_issue.clone())
            .unwrap_or_else(|| "mission_failed".to_string());
        return MissionOutcome::Failed { failure_reason_code: reason };
    }

    MissionOutcome::InProgress
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::{GeoPoint, OrderPriority, WaypointType};
    use uuid::Uuid;

    fn waypoint(sequence: u32, wtype: WaypointType, status: WaypointStatus) -> WaypointSummaryItem {
        WaypointSummaryItem {
            sequence,
            waypoint_type: wtype,
            address_id: Uuid::new_v4(),
            coordinates: GeoPoint::new(0.0, 0.0),
            status,
            confirmation_code: "111111".into(),
            start_at: None,
            end_at: None,
            photo_urls: vec![],
            name: None,
            is_mandatory: false,
            message_issue: None,
        }
    }

    fn order_with(waypoints: Vec<WaypointSummaryItem>, driver_id: Uuid) -> Order {
        Order {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            company_id: None,
            driver_id: Some(driver_id),
            priority: OrderPriority::Med,
            remuneration: 1000,
            client_fee: 1500,
            currency: "XOF".into(),
            pickup_address_id: Uuid::new_v4(),
            delivery_address_id: Uuid::new_v4(),
            note: None,
            assignment_attempt_count: 1,
            calculation_engine: "v1".into(),
            offered_driver_id: None,
            offer_expires_at: None,
            delivery_date: Utc::now().date_naive(),
            delivery_date_estimation: None,
            cancellation_reason_code: None,
            failure_reason_code: None,
            waypoints_summary: waypoints,
            blacklisted_driver_ids: vec![],
        }
    }

    #[test]
    fn arrive_requires_previous_waypoint_cleared() {
        let driver = Uuid::new_v4();
        let mut order = order_with(
            vec![
                waypoint(0, WaypointType::Pickup, WaypointStatus::Pending),
                waypoint(1, WaypointType::Delivery, WaypointStatus::Pending),
            ],
            driver,
        );
        let result = apply_waypoint_transition(&mut order, driver, 1, WaypointAction::Arrive, Utc::now());
        assert!(matches!(result, Err(DispatchError::Conflict(_))));
    }

    #[test]
    fn full_happy_path_through_one_waypoint() {
        let driver = Uuid::new_v4();
        let mut order = order_with(vec![waypoint(0, WaypointType::Pickup, WaypointStatus::Pending)], driver);
        order.waypoints_summary[0].is_mandatory = true;

        apply_waypoint_transition(&mut order, driver, 0, WaypointAction::Arrive, Utc::now()).unwrap();
        apply_waypoint_transition(&mut order, driver, 0, WaypointAction::BeginProcessing, Utc::now()).unwrap();
        let err = apply_waypoint_transition(
            &mut order,
            driver,
            0,
            WaypointAction::Complete { presented_code: "000000".into(), photo_urls: vec!["p".into()] },
            Utc::now(),
        );
        assert!(matches!(err, Err(DispatchError::Validation(_))));

        apply_waypoint_transition(
            &mut order,
            driver,
            0,
            WaypointAction::Complete { presented_code: "111111".into(), photo_urls: vec!["p".into()] },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(order.waypoints_summary[0].status, WaypointStatus::Completed);
    }

    #[test]
    fn wrong_driver_is_rejected() {
        let driver = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut order = order_with(vec![waypoint(0, WaypointType::Pickup, WaypointStatus::Pending)], driver);
        let result = apply_waypoint_transition(&mut order, other, 0, WaypointAction::Arrive, Utc::now());
        assert!(matches!(result, Err(DispatchError::Authorization(_))));
    }

    #[test]
    fn all_completed_yields_success() {
        let driver = Uuid::new_v4();
        let order = order_with(
            vec![
                waypoint(0, WaypointType::Pickup, WaypointStatus::Completed),
                waypoint(1, WaypointType::Delivery, WaypointStatus::Completed),
            ],
            driver,
        );
        assert_eq!(derive_mission_outcome(&order, 1000), MissionOutcome::Success { final_remuneration: 1000 });
    }

    #[test]
    fn partial_completion_prorates_by_integer_division() {
        let driver = Uuid::new_v4();
        let order = order_with(
            vec![
                waypoint(0, WaypointType::Pickup, WaypointStatus::Completed),
                waypoint(1, WaypointType::Delivery, WaypointStatus::Failed),
                waypoint(2, WaypointType::Delivery, WaypointStatus::Completed),
            ],
            driver,
        );
        // 1000 * 2 / 3 = 666 (integer division)
        assert_eq!(
            derive_mission_outcome(&order, 1000),
            MissionOutcome::PartiallyCompleted { final_remuneration: 666 }
        );
    }

    #[test]
    fn all_failed_yields_failed_with_reason() {
        let driver = Uuid::new_v4();
        let mut wp = waypoint(0, WaypointType::Pickup, WaypointStatus::Failed);
        wp.message_issue = Some("recipient_unreachable".into());
        let order = order_with(vec![wp], driver);
        assert_eq!(
            derive_mission_outcome(&order, 1000),
            MissionOutcome::Failed { failure_reason_code: "recipient_unreachable".into() }
        );
    }
}

//! Controllers for the routes enumerated in spec.md §6. Thin by design
//! (§1, §9): validate input, delegate to `dispatch-db`/`dispatch-mission`/
//! `dispatch-pricing`/`dispatch-assignment`, publish whatever event the
//! mutation implies, and let `ApiError` do the status-code mapping.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use dispatch_common::DispatchError;
use dispatch_db::{legs_from_trip, DriverRepository, OrderRepository, RouteLegRepository};
use dispatch_mission::{apply_waypoint_transition, derive_mission_outcome, MissionOutcome, WaypointAction};
use dispatch_pricing::compute_pricing;
use dispatch_routing::Costing;
use dispatch_types::{
    AssignmentEvent, DriverStatus, DriverStatusLogEntry, GeoPoint, MissionLifecycleEvent, Order,
    OrderPriority, OrderStatusLogEntry, OrderStatusLogMetadata, Package, TrackStreamPayload, WaypointSummaryItem,
    WaypointType,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AdminIdentity, DriverIdentity};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id/offer-details", get(offer_details))
        .route("/orders/:id/accept", post(accept_offer))
        .route("/orders/:id/refuse", post(refuse_offer))
        .route("/orders/:id/waypoints/:seq/status", patch(transition_waypoint))
        .route("/driver/status", post(update_driver_status))
        .route("/driver/location", post(update_driver_location))
        .route("/driver/heartbeat", post(driver_heartbeat))
        .route("/admin/orders/:id/assign", post(manual_assign))
        .route("/track-stream/:order_id", get(track_stream))
        .with_state(state)
}

// ---------------------------------------------------------------- orders

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub client_id: Uuid,
    pub company_id: Option<Uuid>,
    #[serde(default = "default_priority")]
    pub priority: OrderPriority,
    #[validate(length(min = 1))]
    pub currency: String,
    pub pickup_address_id: Uuid,
    pub pickup_location: GeoPoint,
    pub delivery_address_id: Uuid,
    pub delivery_location: GeoPoint,
    #[validate(length(min = 1))]
    pub packages: Vec<Package>,
    pub note: Option<String>,
    pub delivery_date: chrono::NaiveDate,
}

fn default_priority() -> OrderPriority {
    OrderPriority::Med
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
}

/// `POST /orders` (spec.md §6): prices and lays out the waypoint summary
/// inline, then hands the order to the assignment engine by publishing
/// `NEW_ORDER_READY_FOR_ASSIGNMENT`.
async fn create_order(State(state): State<AppState>, Json(req): Json<CreateOrderRequest>) -> ApiResult<Json<OrderResponse>> {
    req.validate().map_err(|e| ApiError(DispatchError::Validation(e.to_string())))?;
    if !req.pickup_location.is_valid() || !req.delivery_location.is_valid() {
        return Err(ApiError(DispatchError::Validation("pickup/delivery coordinates out of range".into())));
    }

    let trip = state
        .routing
        .trip(&[req.pickup_location, req.delivery_location], Costing::Auto)
        .await?
        .ok_or_else(|| DispatchError::UpstreamUnavailable("routing engine returned no trip".into()))?;

    let pricing = compute_pricing(trip.total_distance_meters, trip.total_duration_seconds, &req.packages);

    let waypoints = vec![
        WaypointSummaryItem {
            sequence: 0,
            waypoint_type: WaypointType::Pickup,
            address_id: req.pickup_address_id,
            coordinates: req.pickup_location,
            status: dispatch_types::WaypointStatus::Pending,
            confirmation_code: state.rng.confirmation_code(),
            start_at: None,
            end_at: None,
            photo_urls: vec![],
            name: None,
            is_mandatory: true,
            message_issue: None,
        },
        WaypointSummaryItem {
            sequence: 1,
            waypoint_type: WaypointType::Delivery,
            address_id: req.delivery_address_id,
            coordinates: req.delivery_location,
            status: dispatch_types::WaypointStatus::Pending,
            confirmation_code: state.rng.confirmation_code(),
            start_at: None,
            end_at: None,
            photo_urls: vec![],
            name: None,
            is_mandatory: true,
            message_issue: None,
        },
    ];

    let order = OrderRepository::insert(
        &state.pool,
        req.client_id,
        req.company_id,
        req.priority,
        pricing.driver_remuneration,
        pricing.client_fee,
        &req.currency,
        req.pickup_address_id,
        req.delivery_address_id,
        req.delivery_date,
        "v1",
        &waypoints,
    )
    .await?;

    // Leg 0 (driver origin to the first waypoint) can't exist yet — no
    // driver is assigned — so only the waypoint-to-waypoint legs are
    // stored here. `AssignmentEngine::finalize_accept`/`finalize_manual`
    // add leg 0 once a driver is committed (spec.md §3 invariant
    // `count(legs) = count(waypoints)`).
    let leg_waypoints = [(req.pickup_address_id, req.pickup_location), (req.delivery_address_id, req.delivery_location)];
    let legs = legs_from_trip(order.id, &leg_waypoints, &trip.legs);
    RouteLegRepository::replace_for_order(&state.pool, order.id, &legs).await?;

    let event = AssignmentEvent::new(MissionLifecycleEvent::NewOrderReadyForAssignment, order.id);
    state.assignment_events.publish(&event).await?;

    Ok(Json(OrderResponse { order }))
}

/// `GET /orders/:id/offer-details` — the offered driver's own view of a
/// live offer.
async fn offer_details(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    DriverIdentity(driver_id): DriverIdentity,
) -> ApiResult<Json<OrderResponse>> {
    let order = OrderRepository::find_by_id(&state.pool, order_id).await?;
    if order.offered_driver_id != Some(driver_id) {
        return Err(ApiError(DispatchError::NotFound("no live offer for this driver on this order".into())));
    }
    Ok(Json(OrderResponse { order }))
}

/// `POST /orders/:id/accept` (spec.md §4.4 "Finalize on accept", §6):
/// commits the assignment, then publishes `OFFER_ACCEPTED_BY_DRIVER` so
/// the assignment worker drops the order from any retry bookkeeping.
async fn accept_offer(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    DriverIdentity(driver_id): DriverIdentity,
) -> ApiResult<Json<OrderResponse>> {
    state.engine.finalize_accept(order_id, driver_id).await?;
    let event =
        AssignmentEvent::new(MissionLifecycleEvent::OfferAcceptedByDriver, order_id).with_field("driverId", driver_id);
    state.assignment_events.publish(&event).await?;

    let order = OrderRepository::find_by_id(&state.pool, order_id).await?;
    state.tracks.publish(
        order_id,
        TrackStreamPayload::StatusUpdated {
            order_id,
            client_id: order.client_id,
            new_status: "ACCEPTED".to_string(),
            timestamp: state.clock.now(),
            log_entry: None,
        },
    );
    Ok(Json(OrderResponse { order }))
}

/// `POST /orders/:id/refuse` — `AssignmentEngine::refuse_offer` already
/// publishes `OFFER_REFUSED_BY_DRIVER` for the retry cascade.
async fn refuse_offer(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    DriverIdentity(driver_id): DriverIdentity,
) -> ApiResult<impl IntoResponse> {
    state.engine.refuse_offer(order_id, driver_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// -------------------------------------------------------------- waypoints

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointActionRequest {
    Arrive,
    BeginProcessing,
    Complete,
    Fail,
}

#[derive(Debug, Deserialize)]
pub struct WaypointTransitionRequest {
    pub action: WaypointActionRequest,
    pub confirmation_code: Option<String>,
    #[serde(default)]
    pub photo_urls: Vec<String>,
    pub message_issue: Option<String>,
}

/// `PATCH /orders/:id/waypoints/:seq/status` (spec.md §4.5, §6). Applies
/// the waypoint transition, persists the updated summary, emits the
/// `OrderStatusLog` entry the transition implies, and — when the
/// transition closes out the mission — finalizes the order and publishes
/// `COMPLETED`/`FAILED` per spec.md §4.5's terminal-state derivation.
async fn transition_waypoint(
    State(state): State<AppState>,
    Path((order_id, sequence)): Path<(Uuid, u32)>,
    DriverIdentity(driver_id): DriverIdentity,
    Json(req): Json<WaypointTransitionRequest>,
) -> ApiResult<Json<OrderResponse>> {
    let mut order = OrderRepository::find_by_id(&state.pool, order_id).await?;
    let now = state.clock.now();

    let action = match req.action {
        WaypointActionRequest::Arrive => WaypointAction::Arrive,
        WaypointActionRequest::BeginProcessing => WaypointAction::BeginProcessing,
        WaypointActionRequest::Complete => WaypointAction::Complete {
            presented_code: req
                .confirmation_code
                .ok_or_else(|| DispatchError::Validation("confirmation_code is required to complete a waypoint".into()))?,
            photo_urls: req.photo_urls,
        },
        WaypointActionRequest::Fail => WaypointAction::Fail {
            message_issue: req
                .message_issue
                .ok_or_else(|| DispatchError::Validation("message_issue is required to fail a waypoint".into()))?,
        },
    };

    let status_label = apply_waypoint_transition(&mut order, driver_id, sequence, action, now)?;
    order = OrderRepository::replace_waypoints_summary(&state.pool, order_id, &order.waypoints_summary).await?;

    if let Some(status) = status_label {
        let waypoint = order.waypoints_summary.iter().find(|w| w.sequence == sequence);
        let entry = OrderStatusLogEntry {
            order_id,
            status: status.to_string(),
            changed_at: now,
            changed_by_user_id: Some(driver_id),
            current_location: waypoint.map(|w| w.coordinates),
            metadata: OrderStatusLogMetadata {
                waypoint_sequence: Some(sequence),
                waypoint_type: waypoint.map(|w| format!("{:?}", w.waypoint_type)),
                waypoint_status: waypoint.map(|w| format!("{:?}", w.status)),
                reason: None,
            },
        };
        OrderRepository::insert_status_log(&state.pool, &entry).await?;
        state.tracks.publish(
            order_id,
            TrackStreamPayload::StatusUpdated {
                order_id,
                client_id: order.client_id,
                new_status: status.to_string(),
                timestamp: now,
                log_entry: Some(entry),
            },
        );
    }

    match derive_mission_outcome(&order, order.remuneration) {
        MissionOutcome::Success { final_remuneration } | MissionOutcome::PartiallyCompleted { final_remuneration } => {
            if let Some(driver_id) = order.driver_id {
                let event = AssignmentEvent::new(MissionLifecycleEvent::Completed, order_id)
                    .with_field("driverId", driver_id)
                    .with_field("finalRemuneration", final_remuneration)
                    .with_field("currency", order.currency.clone());
                let event = match order.company_id {
                    Some(company_id) => event.with_field("companyId", company_id),
                    None => event,
                };
                state.assignment_events.publish(&event).await?;
            }
        }
        MissionOutcome::Failed { failure_reason_code } => {
            order = OrderRepository::finalize_failed(&state.pool, order_id, &failure_reason_code).await?;
            let event = AssignmentEvent::new(MissionLifecycleEvent::Failed, order_id)
                .with_field("failureReasonCode", failure_reason_code);
            state.assignment_events.publish(&event).await?;
        }
        MissionOutcome::InProgress => {}
    }

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------- driver

#[derive(Debug, Deserialize)]
pub struct DriverStatusRequest {
    pub status: DriverStatus,
}

async fn update_driver_status(
    State(state): State<AppState>,
    DriverIdentity(driver_id): DriverIdentity,
    Json(req): Json<DriverStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let now = state.clock.now();
    DriverRepository::update_status(&state.pool, driver_id, req.status, None).await?;
    DriverRepository::insert_status_log(
        &state.pool,
        &DriverStatusLogEntry {
            driver_id,
            status: req.status,
            changed_at: now,
            metadata: serde_json::json!({ "reason": "driver_reported" }),
        },
    )
    .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DriverLocationRequest {
    pub location: GeoPoint,
}

/// `POST /driver/location` — also fans out `order:driver_location_updated`
/// to the driver's current mission, if any (spec.md §6 real-time payload).
async fn update_driver_location(
    State(state): State<AppState>,
    DriverIdentity(driver_id): DriverIdentity,
    Json(req): Json<DriverLocationRequest>,
) -> ApiResult<impl IntoResponse> {
    if !req.location.is_valid() {
        return Err(ApiError(DispatchError::Validation("location out of range".into())));
    }
    let driver = DriverRepository::find_by_id(&state.pool, driver_id).await?;
    DriverRepository::update_status(&state.pool, driver_id, driver.latest_status, Some(req.location)).await?;

    if let Some(order) = OrderRepository::find_active_for_driver(&state.pool, driver_id).await? {
        state.tracks.publish(
            order.id,
            TrackStreamPayload::DriverLocationUpdated {
                order_id: order.id,
                client_id: order.client_id,
                driver_id,
                location: req.location,
                timestamp: state.clock.now(),
                eta_seconds: None,
            },
        );
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn driver_heartbeat(
    State(state): State<AppState>,
    DriverIdentity(driver_id): DriverIdentity,
) -> ApiResult<impl IntoResponse> {
    DriverRepository::record_heartbeat(&state.pool, driver_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ----------------------------------------------------------------- admin

#[derive(Debug, Deserialize)]
pub struct ManualAssignRequest {
    pub driver_id: Uuid,
}

/// `POST /admin/orders/:id/assign` (spec.md S3): voids any live offer and
/// assigns directly, then publishes `MANUALLY_ASSIGNED` for observers.
async fn manual_assign(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    AdminIdentity(_admin_id): AdminIdentity,
    Json(req): Json<ManualAssignRequest>,
) -> ApiResult<Json<OrderResponse>> {
    state.engine.finalize_manual(order_id, req.driver_id).await?;
    let event = AssignmentEvent::new(MissionLifecycleEvent::ManuallyAssigned, order_id).with_field("driverId", req.driver_id);
    state.assignment_events.publish(&event).await?;
    let order = OrderRepository::find_by_id(&state.pool, order_id).await?;
    Ok(Json(OrderResponse { order }))
}

// ------------------------------------------------------------- real-time

/// `GET /track-stream/:order_id` — server-sent events over the per-order
/// broadcast channel (spec.md §6, §2 "Real-time Fan-out").
async fn track_stream(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tracks.subscribe(order_id);
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        item.ok().and_then(|payload| serde_json::to_string(&payload).ok()).map(|json| Ok(Event::default().data(json)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

//! Persistence for `OrderRouteLeg` (spec.md §3). Legs are recomputed
//! wholesale rather than patched: `replace_for_order` deletes whatever the
//! order had and inserts the fresh set, which keeps the
//! `count(legs) = count(waypoints)` invariant trivial to maintain from the
//! call sites (order creation, driver assignment, waypoint re-sequencing).

use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::{GeoPoint, LineString, Maneuver, OrderRouteLeg};
use sqlx::PgPool;
use uuid::Uuid;

use crate::codec::{columns_to_point, point_to_columns};

#[derive(sqlx::FromRow)]
struct RouteLegRow {
    order_id: Uuid,
    leg_sequence: i32,
    start_address_id: Option<Uuid>,
    end_address_id: Option<Uuid>,
    start_lon: f64,
    start_lat: f64,
    end_lon: f64,
    end_lat: f64,
    geometry: serde_json::Value,
    duration_seconds: f64,
    distance_meters: f64,
    maneuvers: serde_json::Value,
}

impl RouteLegRow {
    fn into_domain(self) -> DispatchResult<OrderRouteLeg> {
        let start_coordinates =
            columns_to_point(Some(self.start_lon), Some(self.start_lat)).ok_or_else(|| {
                DispatchError::Unrecoverable("route leg start coordinates missing".into())
            })?;
        let end_coordinates = columns_to_point(Some(self.end_lon), Some(self.end_lat))
            .ok_or_else(|| DispatchError::Unrecoverable("route leg end coordinates missing".into()))?;
        Ok(OrderRouteLeg {
            order_id: self.order_id,
            leg_sequence: self.leg_sequence.max(0) as u32,
            start_address_id: self.start_address_id,
            end_address_id: self.end_address_id,
            start_coordinates,
            end_coordinates,
            geometry: serde_json::from_value::<LineString>(self.geometry)
                .map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            maneuvers: serde_json::from_value::<Vec<Maneuver>>(self.maneuvers)
                .map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
        })
    }
}

const ROUTE_LEG_COLUMNS: &str = r#"
    order_id, leg_sequence, start_address_id, end_address_id,
    start_lon, start_lat, end_lon, end_lat, geometry, duration_seconds, distance_meters, maneuvers
"#;

pub struct RouteLegRepository;

impl RouteLegRepository {
    pub async fn for_order(pool: &PgPool, order_id: Uuid) -> DispatchResult<Vec<OrderRouteLeg>> {
        let query = format!(
            "SELECT {ROUTE_LEG_COLUMNS} FROM order_route_legs WHERE order_id = $1 ORDER BY leg_sequence ASC"
        );
        let rows = sqlx::query_as::<_, RouteLegRow>(&query).bind(order_id).fetch_all(pool).await?;
        rows.into_iter().map(RouteLegRow::into_domain).collect()
    }

    /// Inserts or replaces a single leg (used for leg 0, the driver-origin
    /// leg, which only exists once a driver is assigned and is recomputed
    /// on every reassignment). Requires a unique `(order_id, leg_sequence)`
    /// constraint on `order_route_legs`.
    pub async fn upsert(pool: &PgPool, leg: &OrderRouteLeg) -> DispatchResult<()> {
        let (start_lon, start_lat) = point_to_columns(Some(leg.start_coordinates));
        let (end_lon, end_lat) = point_to_columns(Some(leg.end_coordinates));
        let query = format!(
            r#"INSERT INTO order_route_legs ({ROUTE_LEG_COLUMNS})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
               ON CONFLICT (order_id, leg_sequence) DO UPDATE SET
                   start_address_id = EXCLUDED.start_address_id,
                   end_address_id = EXCLUDED.end_address_id,
                   start_lon = EXCLUDED.start_lon, start_lat = EXCLUDED.start_lat,
                   end_lon = EXCLUDED.end_lon, end_lat = EXCLUDED.end_lat,
                   geometry = EXCLUDED.geometry,
                   duration_seconds = EXCLUDED.duration_seconds,
                   distance_meters = EXCLUDED.distance_meters,
                   maneuvers = EXCLUDED.maneuvers"#
        );
        sqlx::query(&query)
            .bind(leg.order_id)
            .bind(leg.leg_sequence as i32)
            .bind(leg.start_address_id)
            .bind(leg.end_address_id)
            .bind(start_lon)
            .bind(start_lat)
            .bind(end_lon)
            .bind(end_lat)
            .bind(serde_json::to_value(&leg.geometry).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
            .bind(leg.duration_seconds)
            .bind(leg.distance_meters)
            .bind(serde_json::to_value(&leg.maneuvers).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Deletes whatever legs an order currently has and inserts `legs` in
    /// their place, inside one transaction. Used both at order creation
    /// (waypoint-to-waypoint legs only — leg 0 doesn't exist yet, there's
    /// no driver to originate from) and at assignment finalization (the
    /// full set, leg 0 included).
    pub async fn replace_for_order(pool: &PgPool, order_id: Uuid, legs: &[OrderRouteLeg]) -> DispatchResult<()> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM order_route_legs WHERE order_id = $1").bind(order_id).execute(&mut *tx).await?;
        for leg in legs {
            let (start_lon, start_lat) = point_to_columns(Some(leg.start_coordinates));
            let (end_lon, end_lat) = point_to_columns(Some(leg.end_coordinates));
            let query = format!(
                r#"INSERT INTO order_route_legs ({ROUTE_LEG_COLUMNS})
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#
            );
            sqlx::query(&query)
                .bind(leg.order_id)
                .bind(leg.leg_sequence as i32)
                .bind(leg.start_address_id)
                .bind(leg.end_address_id)
                .bind(start_lon)
                .bind(start_lat)
                .bind(end_lon)
                .bind(end_lat)
                .bind(serde_json::to_value(&leg.geometry).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
                .bind(leg.duration_seconds)
                .bind(leg.distance_meters)
                .bind(
                    serde_json::to_value(&leg.maneuvers).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
                )
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// Builds the waypoint-to-waypoint legs (sequence 1..N-1) from a routing
/// engine's `TripResult`, matching `waypoints` 1:1 by window. Leg 0 (driver
/// origin to the first waypoint) is added separately once a driver is
/// assigned — see `AssignmentEngine::finalize_accept`/`finalize_manual`.
pub fn legs_from_trip(
    order_id: Uuid,
    waypoints: &[(Uuid, GeoPoint)],
    legs: &[dispatch_routing::RouteLegResult],
) -> Vec<OrderRouteLeg> {
    waypoints
        .windows(2)
        .zip(legs.iter())
        .enumerate()
        .map(|(i, (pair, leg))| OrderRouteLeg {
            order_id,
            leg_sequence: (i + 1) as u32,
            start_address_id: Some(pair[0].0),
            end_address_id: Some(pair[1].0),
            start_coordinates: pair[0].1,
            end_coordinates: pair[1].1,
            geometry: leg.geometry.clone(),
            duration_seconds: leg.duration_seconds,
            distance_meters: leg.distance_meters,
            maneuvers: leg.maneuvers.clone(),
        })
        .collect()
}

/// Builds leg 0 (driver origin to the first waypoint) from a
/// `DirectRouteResult`.
pub fn origin_leg(
    order_id: Uuid,
    first_waypoint_address_id: Uuid,
    route: &dispatch_routing::DirectRouteResult,
    start: GeoPoint,
    end: GeoPoint,
) -> OrderRouteLeg {
    OrderRouteLeg {
        order_id,
        leg_sequence: 0,
        start_address_id: None,
        end_address_id: Some(first_waypoint_address_id),
        start_coordinates: start,
        end_coordinates: end,
        geometry: route.geometry.clone(),
        duration_seconds: route.duration_seconds,
        distance_meters: route.distance_meters,
        maneuvers: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_routing::RouteLegResult;
    use dispatch_types::LineString;

    #[test]
    fn legs_from_trip_are_sequenced_from_one() {
        let order_id = Uuid::new_v4();
        let pickup_id = Uuid::new_v4();
        let delivery_id = Uuid::new_v4();
        let pickup = GeoPoint::new(-4.035, 5.365);
        let delivery = GeoPoint::new(-4.02, 5.37);
        let legs = legs_from_trip(
            order_id,
            &[(pickup_id, pickup), (delivery_id, delivery)],
            &[RouteLegResult {
                geometry: LineString { points: vec![pickup, delivery] },
                duration_seconds: 300.0,
                distance_meters: 2000.0,
                maneuvers: vec![],
            }],
        );
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].leg_sequence, 1);
        assert_eq!(legs[0].start_address_id, Some(pickup_id));
        assert_eq!(legs[0].end_address_id, Some(delivery_id));
    }
}

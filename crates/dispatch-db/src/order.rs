use chrono::{DateTime, NaiveDate, Utc};
use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::{Order, OrderPriority, OrderStatusLogEntry, WaypointSummaryItem};
use sqlx::PgPool;
use uuid::Uuid;

use crate::codec::{enum_to_text, text_to_enum};

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    client_id: Uuid,
    company_id: Option<Uuid>,
    driver_id: Option<Uuid>,
    priority: String,
    remuneration: i64,
    client_fee: i64,
    currency: String,
    pickup_address_id: Uuid,
    delivery_address_id: Uuid,
    note: Option<String>,
    assignment_attempt_count: i32,
    calculation_engine: String,
    offered_driver_id: Option<Uuid>,
    offer_expires_at: Option<DateTime<Utc>>,
    delivery_date: NaiveDate,
    delivery_date_estimation: Option<NaiveDate>,
    cancellation_reason_code: Option<String>,
    failure_reason_code: Option<String>,
    waypoints_summary: serde_json::Value,
    blacklisted_driver_ids: Vec<Uuid>,
}

impl OrderRow {
    fn into_domain(self) -> DispatchResult<Order> {
        Ok(Order {
            id: self.id,
            client_id: self.client_id,
            company_id: self.company_id,
            driver_id: self.driver_id,
            priority: text_to_enum(&self.priority)?,
            remuneration: self.remuneration,
            client_fee: self.client_fee,
            currency: self.currency,
            pickup_address_id: self.pickup_address_id,
            delivery_address_id: self.delivery_address_id,
            note: self.note,
            assignment_attempt_count: self.assignment_attempt_count.max(0) as u32,
            calculation_engine: self.calculation_engine,
            offered_driver_id: self.offered_driver_id,
            offer_expires_at: self.offer_expires_at,
            delivery_date: self.delivery_date,
            delivery_date_estimation: self.delivery_date_estimation,
            cancellation_reason_code: self.cancellation_reason_code,
            failure_reason_code: self.failure_reason_code,
            waypoints_summary: serde_json::from_value::<Vec<WaypointSummaryItem>>(self.waypoints_summary)
                .map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
            blacklisted_driver_ids: self.blacklisted_driver_ids,
        })
    }
}

const ORDER_COLUMNS: &str = r#"
    id, client_id, company_id, driver_id, priority, remuneration, client_fee, currency,
    pickup_address_id, delivery_address_id, note, assignment_attempt_count, calculation_engine,
    offered_driver_id, offer_expires_at, delivery_date, delivery_date_estimation,
    cancellation_reason_code, failure_reason_code, waypoints_summary, blacklisted_driver_ids
"#;

pub struct OrderRepository;

impl OrderRepository {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> DispatchResult<Order> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("order {id} not found")))?;
        row.into_domain()
    }

    /// Orders with neither a live offer nor a confirmed driver, ready for
    /// the assignment engine's next attempt (spec.md §4.4).
    pub async fn list_ready_for_assignment(pool: &PgPool, limit: i64) -> DispatchResult<Vec<Order>> {
        let query = format!(
            r#"SELECT {ORDER_COLUMNS} FROM orders
               WHERE driver_id IS NULL AND offered_driver_id IS NULL
                 AND cancellation_reason_code IS NULL AND failure_reason_code IS NULL
               ORDER BY priority DESC, delivery_date ASC
               LIMIT $1"#
        );
        let rows = sqlx::query_as::<_, OrderRow>(&query).bind(limit).fetch_all(pool).await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    /// Orders with an outstanding offer whose `offer_expires_at` has
    /// passed, for the assignment engine's expirer sub-loop.
    pub async fn list_expired_offers(pool: &PgPool, now: DateTime<Utc>, limit: i64) -> DispatchResult<Vec<Order>> {
        let query = format!(
            r#"SELECT {ORDER_COLUMNS} FROM orders
               WHERE offered_driver_id IS NOT NULL AND offer_expires_at <= $1
               ORDER BY offer_expires_at ASC
               LIMIT $2"#
        );
        let rows = sqlx::query_as::<_, OrderRow>(&query).bind(now).bind(limit).fetch_all(pool).await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        pool: &PgPool,
        client_id: Uuid,
        company_id: Option<Uuid>,
        priority: OrderPriority,
        remuneration: i64,
        client_fee: i64,
        currency: &str,
        pickup_address_id: Uuid,
        delivery_address_id: Uuid,
        delivery_date: NaiveDate,
        calculation_engine: &str,
        waypoints_summary: &[WaypointSummaryItem],
    ) -> DispatchResult<Order> {
        let query = format!(
            r#"
            INSERT INTO orders (
                client_id, company_id, priority, remuneration, client_fee, currency,
                pickup_address_id, delivery_address_id, delivery_date, calculation_engine,
                assignment_attempt_count, waypoints_summary, blacklisted_driver_ids
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, '{{}}')
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(client_id)
            .bind(company_id)
            .bind(enum_to_text(&priority)?)
            .bind(remuneration)
            .bind(client_fee)
            .bind(currency)
            .bind(pickup_address_id)
            .bind(delivery_address_id)
            .bind(delivery_date)
            .bind(calculation_engine)
            .bind(serde_json::to_value(waypoints_summary).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
            .fetch_one(pool)
            .await?;
        row.into_domain()
    }

    /// Moves the order from pending into the offered phase, incrementing
    /// the attempt counter (spec.md §4.4 invariant: never both a driver
    /// and a live offer).
    pub async fn propose_offer(
        pool: &PgPool,
        id: Uuid,
        driver_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> DispatchResult<Order> {
        let query = format!(
            r#"
            UPDATE orders
            SET offered_driver_id = $1, offer_expires_at = $2,
                assignment_attempt_count = assignment_attempt_count + 1, updated_at = NOW()
            WHERE id = $3 AND driver_id IS NULL AND offered_driver_id IS NULL
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(driver_id)
            .bind(expires_at)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::Conflict(format!("order {id} already has an offer or assignment")))?;
        row.into_domain()
    }

    /// Records an assignment pass that found no candidate (spec.md §4.4
    /// step 5): the counter must advance even when no offer is made, or
    /// `MAX_ASSIGNMENT_ATTEMPTS` is never reached and the order retries
    /// forever.
    pub async fn increment_attempt_count(pool: &PgPool, id: Uuid) -> DispatchResult<Order> {
        let query = format!(
            r#"
            UPDATE orders
            SET assignment_attempt_count = assignment_attempt_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("order {id} not found")))?;
        row.into_domain()
    }

    pub async fn accept_offer(pool: &PgPool, id: Uuid, driver_id: Uuid) -> DispatchResult<Order> {
        let query = format!(
            r#"
            UPDATE orders
            SET driver_id = $1, offered_driver_id = NULL, offer_expires_at = NULL, updated_at = NOW()
            WHERE id = $2 AND offered_driver_id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(driver_id)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::Conflict(format!("order {id} offer is stale or belongs to another driver")))?;
        row.into_domain()
    }

    /// Clears a refused/expired offer and blacklists the driver for this
    /// order's remaining attempts.
    pub async fn clear_offer_and_blacklist(pool: &PgPool, id: Uuid, driver_id: Uuid) -> DispatchResult<Order> {
        let query = format!(
            r#"
            UPDATE orders
            SET offered_driver_id = NULL, offer_expires_at = NULL,
                blacklisted_driver_ids = array_append(blacklisted_driver_ids, $1),
                updated_at = NOW()
            WHERE id = $2
            RETURNING {ORDER_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query).bind(driver_id).bind(id).fetch_one(pool).await?;
        row.into_domain()
    }

    pub async fn replace_waypoints_summary(
        pool: &PgPool,
        id: Uuid,
        waypoints_summary: &[WaypointSummaryItem],
    ) -> DispatchResult<Order> {
        let query = format!(
            r#"UPDATE orders SET waypoints_summary = $1, updated_at = NOW() WHERE id = $2 RETURNING {ORDER_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(serde_json::to_value(waypoints_summary).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
            .bind(id)
            .fetch_one(pool)
            .await?;
        row.into_domain()
    }

    pub async fn finalize_cancelled(pool: &PgPool, id: Uuid, reason_code: &str) -> DispatchResult<Order> {
        let query = format!(
            r#"UPDATE orders SET cancellation_reason_code = $1, updated_at = NOW() WHERE id = $2 RETURNING {ORDER_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query).bind(reason_code).bind(id).fetch_one(pool).await?;
        row.into_domain()
    }

    pub async fn finalize_failed(pool: &PgPool, id: Uuid, reason_code: &str) -> DispatchResult<Order> {
        let query = format!(
            r#"UPDATE orders SET failure_reason_code = $1, updated_at = NOW() WHERE id = $2 RETURNING {ORDER_COLUMNS}"#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query).bind(reason_code).bind(id).fetch_one(pool).await?;
        row.into_domain()
    }

    /// The order a driver is currently working, if any — used by the
    /// location-update handler to decide whether a `driver_location_updated`
    /// real-time payload has anyone to reach.
    pub async fn find_active_for_driver(pool: &PgPool, driver_id: Uuid) -> DispatchResult<Option<Order>> {
        let query = format!(
            r#"SELECT {ORDER_COLUMNS} FROM orders
               WHERE driver_id = $1 AND cancellation_reason_code IS NULL AND failure_reason_code IS NULL
               ORDER BY updated_at DESC
               LIMIT 1"#
        );
        let row = sqlx::query_as::<_, OrderRow>(&query).bind(driver_id).fetch_optional(pool).await?;
        let order = row.map(OrderRow::into_domain).transpose()?;
        Ok(order.filter(|o| !o.is_terminal()))
    }

    pub async fn insert_status_log(pool: &PgPool, entry: &OrderStatusLogEntry) -> DispatchResult<()> {
        let (lon, lat) = crate::codec::point_to_columns(entry.current_location);
        sqlx::query(
            r#"
            INSERT INTO order_status_log (
                order_id, status, changed_at, changed_by_user_id,
                current_location_lon, current_location_lat, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.order_id)
        .bind(&entry.status)
        .bind(entry.changed_at)
        .bind(entry.changed_by_user_id)
        .bind(lon)
        .bind(lat)
        .bind(serde_json::to_value(&entry.metadata).map_err(|e| DispatchError::Unrecoverable(e.to_string()))?)
        .execute(pool)
        .await?;
        Ok(())
    }
}

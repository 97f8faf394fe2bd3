use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::{Driver, DriverStatus, DriverStatusLogEntry, GeoPoint, MobileMoneyAccount};
use sqlx::PgPool;
use uuid::Uuid;

use crate::codec::{columns_to_point, enum_to_text, point_to_columns, text_to_enum};

#[derive(sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    user_id: Uuid,
    company_id: Option<Uuid>,
    latest_status: String,
    current_location_lon: Option<f64>,
    current_location_lat: Option<f64>,
    average_rating: f64,
    is_valid_driver: bool,
    mobile_money: serde_json::Value,
    push_token: Option<String>,
}

impl DriverRow {
    fn into_domain(self) -> DispatchResult<Driver> {
        Ok(Driver {
            id: self.id,
            user_id: self.user_id,
            company_id: self.company_id,
            latest_status: text_to_enum(&self.latest_status)?,
            current_location: columns_to_point(self.current_location_lon, self.current_location_lat),
            average_rating: self.average_rating,
            is_valid_driver: self.is_valid_driver,
            mobile_money: serde_json::from_value::<Vec<MobileMoneyAccount>>(self.mobile_money)
                .map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
            push_token: self.push_token,
        })
    }
}

pub struct DriverRepository;

impl DriverRepository {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> DispatchResult<Driver> {
        let row = sqlx::query_as::<_, DriverRow>(
            r#"
            SELECT id, user_id, company_id, latest_status,
                   current_location_lon, current_location_lat,
                   average_rating, is_valid_driver, mobile_money, push_token
            FROM drivers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DispatchError::NotFound(format!("driver {id} not found")))?;
        row.into_domain()
    }

    /// Candidate pool for the assignment engine (spec.md §4.4): active,
    /// valid, located drivers for the company, prefiltered by a bounding
    /// box in SQL and finished with an exact haversine filter/sort in
    /// Rust so the radius check matches `GeoPoint::distance_meters`
    /// exactly.
    pub async fn find_assignment_candidates(
        pool: &PgPool,
        company_id: Option<Uuid>,
        near: GeoPoint,
        radius_km: f64,
        exclude_driver_ids: &[Uuid],
    ) -> DispatchResult<Vec<(Driver, f64)>> {
        let deg_pad = (radius_km / 111.0).max(0.01);
        let rows = sqlx::query_as::<_, DriverRow>(
            r#"
            SELECT id, user_id, company_id, latest_status,
                   current_location_lon, current_location_lat,
                   average_rating, is_valid_driver, mobile_money, push_token
            FROM drivers
            WHERE is_valid_driver = true
              AND latest_status = 'active'
              AND current_location_lon IS NOT NULL
              AND current_location_lat IS NOT NULL
              AND ($1::uuid IS NULL OR company_id = $1)
              AND NOT (id = ANY($2))
              AND current_location_lon BETWEEN $3 AND $4
              AND current_location_lat BETWEEN $5 AND $6
            "#,
        )
        .bind(company_id)
        .bind(exclude_driver_ids)
        .bind(near.lon - deg_pad)
        .bind(near.lon + deg_pad)
        .bind(near.lat - deg_pad)
        .bind(near.lat + deg_pad)
        .fetch_all(pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let driver = row.into_domain()?;
            if let Some(location) = driver.current_location {
                let distance_m = near.distance_meters(&location);
                if distance_m <= radius_km * 1000.0 {
                    candidates.push((driver, distance_m));
                }
            }
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(candidates)
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: DriverStatus,
        location: Option<GeoPoint>,
    ) -> DispatchResult<Driver> {
        let (lon, lat) = point_to_columns(location);
        let row = sqlx::query_as::<_, DriverRow>(
            r#"
            UPDATE drivers
            SET latest_status = $1,
                current_location_lon = COALESCE($2, current_location_lon),
                current_location_lat = COALESCE($3, current_location_lat),
                updated_at = NOW()
            WHERE id = $4
            RETURNING id, user_id, company_id, latest_status,
                      current_location_lon, current_location_lat,
                      average_rating, is_valid_driver, mobile_money, push_token
            "#,
        )
        .bind(enum_to_text(&status)?)
        .bind(lon)
        .bind(lat)
        .bind(id)
        .fetch_one(pool)
        .await?;
        row.into_domain()
    }

    pub async fn update_push_token(pool: &PgPool, id: Uuid, push_token: &str) -> DispatchResult<()> {
        sqlx::query("UPDATE drivers SET push_token = $1, updated_at = NOW() WHERE id = $2")
            .bind(push_token)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Invalidates a push token the FCM gateway reported as no longer
    /// registered (spec.md §4.6 step 4, S5).
    pub async fn clear_push_token(pool: &PgPool, id: Uuid) -> DispatchResult<()> {
        sqlx::query("UPDATE drivers SET push_token = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn record_heartbeat(pool: &PgPool, id: Uuid) -> DispatchResult<()> {
        sqlx::query("UPDATE drivers SET last_heartbeat_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Ids of non-inactive drivers in `partition` whose heartbeat is
    /// missing or older than `ttl_seconds`, for the heartbeat monitor
    /// (SPEC_FULL.md supplementary feature). Same partitioning scheme as
    /// `AvailabilityRuleRepository::scheduled_driver_ids`.
    pub async fn find_stale_heartbeat_ids(
        pool: &PgPool,
        ttl_seconds: u64,
        partition: u32,
        partition_count: u32,
    ) -> DispatchResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM drivers
            WHERE latest_status != 'inactive'
              AND (last_heartbeat_at IS NULL OR last_heartbeat_at < NOW() - ($1 || ' seconds')::interval)
              AND ((('x' || substr(md5(id::text), 1, 8))::bit(32)::int::int8 & 2147483647) % $3) = $2
            "#,
        )
        .bind(ttl_seconds as i64)
        .bind(partition as i32)
        .bind(partition_count as i32)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn insert_status_log(pool: &PgPool, entry: &DriverStatusLogEntry) -> DispatchResult<()> {
        sqlx::query(
            "INSERT INTO driver_status_log (driver_id, status, changed_at, metadata) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.driver_id)
        .bind(enum_to_text(&entry.status)?)
        .bind(entry.changed_at)
        .bind(&entry.metadata)
        .execute(pool)
        .await?;
        Ok(())
    }
}

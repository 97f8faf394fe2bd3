use async_trait::async_trait;
use chrono::NaiveDate;
use dispatch_availability::AvailabilityStore;
use dispatch_types::{AvailabilityException, AvailabilityRule};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgAvailabilityStore {
    pool: PgPool,
}

impl PgAvailabilityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityStore for PgAvailabilityStore {
    async fn exception_for_date(
        &self,
        driver_id: Uuid,
        date: NaiveDate,
    ) -> anyhow::Result<Option<AvailabilityException>> {
        let row = sqlx::query_as::<_, AvailabilityException>(
            r#"
            SELECT driver_id, date, is_unavailable_all_day,
                   unavailable_start_time, unavailable_end_time, reason
            FROM driver_availability_exceptions
            WHERE driver_id = $1 AND date = $2
            "#,
        )
        .bind(driver_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn rules_for_day(&self, driver_id: Uuid, day_of_week: u8) -> anyhow::Result<Vec<AvailabilityRule>> {
        let rows = sqlx::query_as::<_, AvailabilityRule>(
            r#"
            SELECT driver_id, day_of_week, start_time, end_time, is_active
            FROM driver_availability_rules
            WHERE driver_id = $1 AND day_of_week = $2 AND is_active = true
            ORDER BY start_time ASC
            "#,
        )
        .bind(driver_id)
        .bind(day_of_week as i16)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for AvailabilityRule {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        Ok(AvailabilityRule {
            driver_id: row.try_get("driver_id")?,
            day_of_week: row.try_get::<i16, _>("day_of_week")? as u8,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for AvailabilityException {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        use sqlx::Row;
        Ok(AvailabilityException {
            driver_id: row.try_get("driver_id")?,
            date: row.try_get("date")?,
            is_unavailable_all_day: row.try_get("is_unavailable_all_day")?,
            unavailable_start_time: row.try_get("unavailable_start_time")?,
            unavailable_end_time: row.try_get("unavailable_end_time")?,
            reason: row.try_get("reason")?,
        })
    }
}

pub struct AvailabilityRuleRepository;

impl AvailabilityRuleRepository {
    pub async fn upsert(pool: &PgPool, rule: &AvailabilityRule) -> dispatch_common::DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO driver_availability_rules (driver_id, day_of_week, start_time, end_time, is_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (driver_id, day_of_week, start_time)
            DO UPDATE SET end_time = EXCLUDED.end_time, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(rule.driver_id)
        .bind(rule.day_of_week as i16)
        .bind(rule.start_time)
        .bind(rule.end_time)
        .bind(rule.is_active)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_exception(pool: &PgPool, exception: &AvailabilityException) -> dispatch_common::DispatchResult<()> {
        sqlx::query(
            r#"
            INSERT INTO driver_availability_exceptions (
                driver_id, date, is_unavailable_all_day, unavailable_start_time, unavailable_end_time, reason
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (driver_id, date)
            DO UPDATE SET is_unavailable_all_day = EXCLUDED.is_unavailable_all_day,
                          unavailable_start_time = EXCLUDED.unavailable_start_time,
                          unavailable_end_time = EXCLUDED.unavailable_end_time,
                          reason = EXCLUDED.reason
            "#,
        )
        .bind(exception.driver_id)
        .bind(exception.date)
        .bind(exception.is_unavailable_all_day)
        .bind(exception.unavailable_start_time)
        .bind(exception.unavailable_end_time)
        .bind(&exception.reason)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// All distinct driver ids with a rule or exception, for the
    /// synchronizer's partitioned sweep (spec.md §4.2).
    pub async fn scheduled_driver_ids(pool: &PgPool, partition: u32, partition_count: u32) -> dispatch_common::DispatchResult<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT driver_id FROM driver_availability_rules
            WHERE ((('x' || substr(md5(driver_id::text), 1, 8))::bit(32)::int::int8 & 2147483647) % $2) = $1
            "#,
        )
        .bind(partition as i32)
        .bind(partition_count as i32)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

//! Partitioned availability synchronizer (spec.md §4.3) and driver
//! heartbeat monitor (a supplementary sweep: a driver whose app stops
//! sending heartbeats is forced `INACTIVE` rather than left stuck in
//! whatever status it last reported).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool as RedisPool;
use dispatch_availability::{cache_key, AvailabilityChecker};
use dispatch_common::{AvailabilitySyncSettings, DispatchError, DispatchResult};
use dispatch_db::{AvailabilityRuleRepository, DriverRepository, PgAvailabilityStore};
use dispatch_eventlog::EventLog;
use dispatch_notify::{driver_push_message, require_push_token};
use dispatch_types::{DriverStatus, DriverStatusLogEntry, NotificationType};
use redis::AsyncCommands;
use sqlx::PgPool;
use uuid::Uuid;

/// Small seam over the per-minute availability cache so the decision
/// logic in [`AvailabilitySynchronizer`] doesn't need a live Redis
/// connection in tests.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, key: &str) -> DispatchResult<Option<bool>>;
    async fn set(&self, key: &str, value: bool, ttl: Duration) -> DispatchResult<()>;
}

pub struct RedisAvailabilityCache {
    pool: RedisPool,
}

impl RedisAvailabilityCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AvailabilityCache for RedisAvailabilityCache {
    async fn get(&self, key: &str) -> DispatchResult<Option<bool>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value.map(|v| v == "1"))
    }

    async fn set(&self, key: &str, value: bool, ttl: Duration) -> DispatchResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let _: () = conn.set_ex(key, if value { "1" } else { "0" }, ttl.as_secs().max(1)).await?;
        Ok(())
    }
}

fn pool_error(err: deadpool_redis::PoolError) -> DispatchError {
    DispatchError::UpstreamUnavailable(format!("redis pool: {err}"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub checked: usize,
    pub flipped: usize,
    pub failed: usize,
}

/// Whether the synchronizer should touch this driver's status, and to
/// what. Pulled out as a pure function per spec.md §4.3 step 2: schedule
/// never overrides an operationally managed state, and a cycle never
/// writes a status equal to the one already on file.
pub fn target_status(current: DriverStatus, schedule_available: bool) -> Option<DriverStatus> {
    if current.is_operationally_managed() {
        return None;
    }
    let target = if schedule_available { DriverStatus::Active } else { DriverStatus::Inactive };
    if target == current {
        None
    } else {
        Some(target)
    }
}

pub struct AvailabilitySynchronizer<C: AvailabilityCache> {
    pool: PgPool,
    checker: AvailabilityChecker<PgAvailabilityStore>,
    cache: C,
    event_log: EventLog,
    settings: AvailabilitySyncSettings,
}

impl<C: AvailabilityCache> AvailabilitySynchronizer<C> {
    pub fn new(pool: PgPool, cache: C, event_log: EventLog, settings: AvailabilitySyncSettings) -> Self {
        let checker = AvailabilityChecker::new(PgAvailabilityStore::new(pool.clone()));
        Self { pool, checker, cache, event_log, settings }
    }

    /// One pass over this worker's partition, in batches, per spec.md
    /// §4.3. Per-driver failures are logged and don't abort the sweep.
    pub async fn run_sweep(&self) -> DispatchResult<SweepStats> {
        let ids = AvailabilityRuleRepository::scheduled_driver_ids(
            &self.pool,
            self.settings.worker_id,
            self.settings.total_workers.max(1),
        )
        .await?;

        let mut stats = SweepStats::default();
        for chunk in ids.chunks(self.settings.batch_size.max(1)) {
            for &driver_id in chunk {
                stats.checked += 1;
                match self.sync_one(driver_id).await {
                    Ok(true) => stats.flipped += 1,
                    Ok(false) => {}
                    Err(err) => {
                        tracing::warn!(%driver_id, error = %err, "availability sync failed for driver");
                        stats.failed += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    async fn sync_one(&self, driver_id: Uuid) -> DispatchResult<bool> {
        let driver = DriverRepository::find_by_id(&self.pool, driver_id).await?;
        if driver.latest_status.is_operationally_managed() {
            return Ok(false);
        }

        let now = Utc::now();
        let key = cache_key(driver_id, now);
        let available = match self.cache.get(&key).await? {
            Some(cached) => cached,
            None => {
                let computed = self.checker.is_available_by_schedule(driver_id, now).await;
                self.cache
                    .set(&key, computed, Duration::from_secs(self.settings.cache_ttl_seconds.max(1)))
                    .await?;
                computed
            }
        };

        let Some(target) = target_status(driver.latest_status, available) else {
            return Ok(false);
        };

        DriverRepository::update_status(&self.pool, driver_id, target, None).await?;
        DriverRepository::insert_status_log(
            &self.pool,
            &DriverStatusLogEntry {
                driver_id,
                status: target,
                changed_at: now,
                metadata: serde_json::json!({ "reason": "schedule_sync" }),
            },
        )
        .await?;

        if let Ok(token) = require_push_token(driver.push_token.as_deref()) {
            let message = driver_push_message(
                driver_id,
                token,
                NotificationType::DriverAvailabilityChanged,
                "Availability updated",
                format!("Your status is now {target:?}"),
                HashMap::new(),
            );
            if let Err(err) = self.event_log.publish_fields(&message.to_wire()).await {
                tracing::warn!(%driver_id, error = %err, "failed to enqueue availability-changed push");
            }
        }

        Ok(true)
    }
}

/// Forces drivers with a stale or missing heartbeat to `INACTIVE`. Not
/// part of spec.md directly; an ambient safeguard so a driver whose app
/// crashed mid-shift doesn't stay eligible for dispatch forever.
pub struct HeartbeatMonitor {
    pool: PgPool,
    settings: AvailabilitySyncSettings,
}

impl HeartbeatMonitor {
    pub fn new(pool: PgPool, settings: AvailabilitySyncSettings) -> Self {
        Self { pool, settings }
    }

    pub async fn run_sweep(&self) -> DispatchResult<usize> {
        let stale_ids = DriverRepository::find_stale_heartbeat_ids(
            &self.pool,
            self.settings.heartbeat_ttl_seconds,
            self.settings.worker_id,
            self.settings.total_workers.max(1),
        )
        .await?;

        let mut forced = 0;
        for driver_id in stale_ids {
            if let Err(err) = DriverRepository::update_status(&self.pool, driver_id, DriverStatus::Inactive, None).await {
                tracing::warn!(%driver_id, error = %err, "failed to force driver inactive on heartbeat timeout");
                continue;
            }
            let _ = DriverRepository::insert_status_log(
                &self.pool,
                &DriverStatusLogEntry {
                    driver_id,
                    status: DriverStatus::Inactive,
                    changed_at: Utc::now(),
                    metadata: serde_json::json!({ "reason": "inactivity_timeout" }),
                },
            )
            .await;
            forced += 1;
        }
        Ok(forced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operationally_managed_states_are_never_touched() {
        assert_eq!(target_status(DriverStatus::Offering, true), None);
        assert_eq!(target_status(DriverStatus::InWork, false), None);
        assert_eq!(target_status(DriverStatus::OnBreak, true), None);
        assert_eq!(target_status(DriverStatus::Pending, false), None);
    }

    #[test]
    fn available_schedule_moves_inactive_to_active() {
        assert_eq!(target_status(DriverStatus::Inactive, true), Some(DriverStatus::Active));
    }

    #[test]
    fn unavailable_schedule_moves_active_to_inactive() {
        assert_eq!(target_status(DriverStatus::Active, false), Some(DriverStatus::Inactive));
    }

    #[test]
    fn matching_status_never_double_writes() {
        assert_eq!(target_status(DriverStatus::Active, true), None);
        assert_eq!(target_status(DriverStatus::Inactive, false), None);
    }
}

//! `AvailabilityChecker.isAvailableBySchedule` from spec.md §4.3: weekly
//! rules plus per-date exceptions, both interpreted in UTC by contract.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use dispatch_types::{AvailabilityException, AvailabilityRule};
use uuid::Uuid;

#[async_trait]
pub trait AvailabilityStore: Send + Sync {
    async fn exception_for_date(
        &self,
        driver_id: Uuid,
        date: chrono::NaiveDate,
    ) -> anyhow::Result<Option<AvailabilityException>>;

    /// Active rules for the day of week, ordered by `start_time` ascending.
    async fn rules_for_day(
        &self,
        driver_id: Uuid,
        day_of_week: u8,
    ) -> anyhow::Result<Vec<AvailabilityRule>>;
}

pub struct AvailabilityChecker<S: AvailabilityStore> {
    store: S,
}

impl<S: AvailabilityStore> AvailabilityChecker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Converts `instant` to UTC, checks the exception for that date first
    /// (it wins over any rule), then falls through to the weekly rules.
    /// Any error along the way resolves to `false` — the safe default.
    pub async fn is_available_by_schedule(&self, driver_id: Uuid, instant: DateTime<Utc>) -> bool {
        match self.try_is_available(driver_id, instant).await {
            Ok(available) => available,
            Err(err) => {
                tracing::warn!(%driver_id, error = %err, "availability check failed, defaulting to unavailable");
                false
            }
        }
    }

    async fn try_is_available(&self, driver_id: Uuid, instant: DateTime<Utc>) -> anyhow::Result<bool> {
        let date = instant.date_naive();
        let time = instant.time();
        // chrono's `weekday().num_days_from_sunday()` gives 0 = Sunday,
        // matching spec.md's day-of-week convention directly.
        let day_of_week = instant.weekday().num_days_from_sunday() as u8;

        if let Some(exception) = self.store.exception_for_date(driver_id, date).await? {
            if exception.is_unavailable_all_day {
                return Ok(false);
            }
            if let (Some(start), Some(end)) =
                (exception.unavailable_start_time, exception.unavailable_end_time)
            {
                if time >= start && time < end {
                    return Ok(false);
                }
            }
        }

        let rules = self.store.rules_for_day(driver_id, day_of_week).await?;
        let available = rules
            .iter()
            .filter(|r| r.is_active)
            .any(|r| time >= r.start_time && time < r.end_time);

        Ok(available)
    }
}

/// `availability:{driver}:{utc-minute}` cache key, per spec.md §5.
pub fn cache_key(driver_id: Uuid, instant: DateTime<Utc>) -> String {
    format!(
        "availability:{driver_id}:{:04}{:02}{:02}{:02}{:02}",
        instant.year(),
        instant.month(),
        instant.day(),
        instant.hour(),
        instant.minute()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct FakeStore {
        exceptions: HashMap<(Uuid, chrono::NaiveDate), AvailabilityException>,
        rules: HashMap<(Uuid, u8), Vec<AvailabilityRule>>,
        fail: Mutex<bool>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self { exceptions: HashMap::new(), rules: HashMap::new(), fail: Mutex::new(false) }
        }
    }

    #[async_trait]
    impl AvailabilityStore for FakeStore {
        async fn exception_for_date(
            &self,
            driver_id: Uuid,
            date: chrono::NaiveDate,
        ) -> anyhow::Result<Option<AvailabilityException>> {
            if *self.fail.lock().await {
                anyhow::bail!("boom");
            }
            Ok(self.exceptions.get(&(driver_id, date)).cloned())
        }

        async fn rules_for_day(&self, driver_id: Uuid, day_of_week: u8) -> anyhow::Result<Vec<AvailabilityRule>> {
            Ok(self.rules.get(&(driver_id, day_of_week)).cloned().unwrap_or_default())
        }
    }

    fn monday_14_00() -> DateTime<Utc> {
        // 2026-02-02 is a Monday.
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2026, 2, 2)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn exception_all_day_beats_an_active_rule() {
        let driver = Uuid::new_v4();
        let mut store = FakeStore::new();
        store.rules.insert(
            (driver, 1),
            vec![AvailabilityRule {
                driver_id: driver,
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                is_active: true,
            }],
        );
        store.exceptions.insert(
            (driver, NaiveDate::from_ymd_opt(2026, 2, 2).unwrap()),
            AvailabilityException {
                driver_id: driver,
                date: NaiveDate::from_ymd_opt(2026, 2, 2).unwrap(),
                is_unavailable_all_day: true,
                unavailable_start_time: None,
                unavailable_end_time: None,
                reason: Some("vacation".into()),
            },
        );

        let checker = AvailabilityChecker::new(store);
        assert!(!checker.is_available_by_schedule(driver, monday_14_00()).await);
    }

    #[tokio::test]
    async fn active_rule_covering_the_instant_is_available() {
        let driver = Uuid::new_v4();
        let mut store = FakeStore::new();
        store.rules.insert(
            (driver, 1),
            vec![AvailabilityRule {
                driver_id: driver,
                day_of_week: 1,
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
                is_active: true,
            }],
        );
        let checker = AvailabilityChecker::new(store);
        assert!(checker.is_available_by_schedule(driver, monday_14_00()).await);
    }

    #[tokio::test]
    async fn store_error_defaults_to_unavailable() {
        let driver = Uuid::new_v4();
        let store = FakeStore::new();
        *store.fail.lock().await = true;
        let checker = AvailabilityChecker::new(store);
        assert!(!checker.is_available_by_schedule(driver, monday_14_00()).await);
    }

    #[test]
    fn cache_key_is_per_minute() {
        let driver = Uuid::new_v4();
        let a = cache_key(driver, monday_14_00());
        let b = cache_key(driver, monday_14_00() + chrono::Duration::seconds(30));
        assert_eq!(a, b);
        let c = cache_key(driver, monday_14_00() + chrono::Duration::minutes(1));
        assert_ne!(a, c);
    }
}

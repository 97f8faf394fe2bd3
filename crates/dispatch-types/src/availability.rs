use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `day_of_week`: 0 = Sunday, matching spec.md §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub driver_id: Uuid,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub driver_id: Uuid,
    pub date: NaiveDate,
    pub is_unavailable_all_day: bool,
    pub unavailable_start_time: Option<NaiveTime>,
    pub unavailable_end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

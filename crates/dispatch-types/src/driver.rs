use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Inactive,
    Active,
    Offering,
    InWork,
    OnBreak,
    Pending,
}

impl DriverStatus {
    /// States in which the availability synchronizer must not override
    /// schedule-derived status — they're operationally managed elsewhere.
    pub fn is_operationally_managed(self) -> bool {
        matches!(
            self,
            DriverStatus::InWork | DriverStatus::Offering | DriverStatus::OnBreak | DriverStatus::Pending
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MobileMoneyStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobileMoneyAccount {
    pub provider: String,
    pub number: String,
    pub status: MobileMoneyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    pub latest_status: DriverStatus,
    pub current_location: Option<GeoPoint>,
    pub average_rating: f64,
    pub is_valid_driver: bool,
    pub mobile_money: Vec<MobileMoneyAccount>,
    pub push_token: Option<String>,
}

impl Driver {
    /// `spec.md` §3 invariant: an invalid driver is never a candidate.
    pub fn is_assignment_candidate(&self) -> bool {
        self.is_valid_driver && self.latest_status == DriverStatus::Active && self.current_location.is_some()
    }

    pub fn active_mobile_money(&self) -> Option<&MobileMoneyAccount> {
        self.mobile_money
            .iter()
            .find(|a| a.status == MobileMoneyStatus::Active)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStatusLogEntry {
    pub driver_id: Uuid,
    pub status: DriverStatus,
    pub changed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(status: DriverStatus, valid: bool, located: bool) -> Driver {
        Driver {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            company_id: None,
            latest_status: status,
            current_location: located.then(|| GeoPoint::new(0.0, 0.0)),
            average_rating: 4.5,
            is_valid_driver: valid,
            mobile_money: vec![],
            push_token: None,
        }
    }

    #[test]
    fn invalid_driver_never_a_candidate() {
        assert!(!driver(DriverStatus::Active, false, true).is_assignment_candidate());
    }

    #[test]
    fn driver_without_location_never_a_candidate() {
        assert!(!driver(DriverStatus::Active, true, false).is_assignment_candidate());
    }

    #[test]
    fn valid_active_located_driver_is_a_candidate() {
        assert!(driver(DriverStatus::Active, true, true).is_assignment_candidate());
    }

    #[test]
    fn operationally_managed_states() {
        assert!(DriverStatus::Offering.is_operationally_managed());
        assert!(DriverStatus::InWork.is_operationally_managed());
        assert!(DriverStatus::OnBreak.is_operationally_managed());
        assert!(DriverStatus::Pending.is_operationally_managed());
        assert!(!DriverStatus::Active.is_operationally_managed());
        assert!(!DriverStatus::Inactive.is_operationally_managed());
    }
}

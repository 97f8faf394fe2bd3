use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical schema per DESIGN.md open-question resolution: `company_id`
/// (not `client_id`), with the richer enum including withdrawal/penalty/
/// bonus alongside the driver-payout type this core actually issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    DriverPayment,
    Withdrawal,
    Penalty,
    Bonus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionHistoryEntry {
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTransaction {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub order_id: Uuid,
    pub company_id: Option<Uuid>,
    pub transaction_type: TransactionType,
    pub payment_method: String,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub transaction_reference: Option<String>,
    pub history_status: Vec<TransactionHistoryEntry>,
    pub metadata: serde_json::Value,
    pub payment_date: Option<DateTime<Utc>>,
}

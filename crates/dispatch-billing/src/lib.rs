//! The billing worker from spec.md §4.7: idempotent payout-transaction
//! creation on mission completion, fire-and-forget gateway initiation,
//! and pending-transaction reconciliation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dispatch_common::{DispatchError, DispatchResult};
use dispatch_db::{DriverRepository, TransactionRepository};
use dispatch_types::{
    AssignmentEvent, MissionLifecycleEvent, MobileMoneyAccount, OrderTransaction, TransactionStatus,
    TransactionType,
};
use sqlx::PgPool;
use uuid::Uuid;

pub use dispatch_assignment::ASSIGNMENT_EVENTS_STREAM;

pub const BILLING_CONSUMER_GROUP: &str = "billing_workers";

/// Result of handing a payout request to the gateway at initiation time.
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutInitiation {
    Accepted { reference: String },
    Rejected { reason: String },
}

/// Result of polling the gateway for a previously-initiated payout.
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutStatusCheck {
    Pending,
    Success,
    Failed { reason: String },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_payout(&self, txn_id: Uuid, account: &MobileMoneyAccount, amount: i64) -> PayoutInitiation;
    async fn check_status(&self, reference: &str) -> PayoutStatusCheck;
}

/// Test double and local-dev fallback: accepts every payout immediately
/// and reports success on the first status check. The actual
/// mobile-money integration is out of scope (spec.md §1).
pub struct NullPaymentGateway;

#[async_trait]
impl PaymentGateway for NullPaymentGateway {
    async fn initiate_payout(&self, txn_id: Uuid, _account: &MobileMoneyAccount, _amount: i64) -> PayoutInitiation {
        PayoutInitiation::Accepted { reference: format!("null-gateway-{txn_id}") }
    }

    async fn check_status(&self, _reference: &str) -> PayoutStatusCheck {
        PayoutStatusCheck::Success
    }
}

/// Fields a `mission_completed` event must carry for billing to act on
/// it. Split out as a pure parser so the extraction logic is testable
/// without a stream connection.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFields {
    pub driver_id: Uuid,
    pub final_remuneration: i64,
    pub company_id: Option<Uuid>,
    pub currency: String,
}

pub fn parse_completed_fields(event: &AssignmentEvent) -> DispatchResult<CompletedFields> {
    let driver_id = event
        .field("driverId")
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| DispatchError::Unrecoverable("completed event missing driverId".into()))?;
    let final_remuneration = event
        .field("finalRemuneration")
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| DispatchError::Unrecoverable("completed event missing finalRemuneration".into()))?;
    let company_id = event.field("companyId").and_then(|s| Uuid::parse_str(s).ok());
    let currency = event.field("currency").unwrap_or("XOF").to_string();
    Ok(CompletedFields { driver_id, final_remuneration, company_id, currency })
}

pub struct BillingWorker {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
}

impl BillingWorker {
    pub fn new(pool: PgPool, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { pool, gateway }
    }

    /// Dispatches an `assignment_events` delivery; every event kind
    /// other than `COMPLETED` is a no-op ack (spec.md §4.7 only reacts to
    /// mission completion).
    pub async fn handle_event(&self, event: &AssignmentEvent) -> DispatchResult<()> {
        if event.kind != MissionLifecycleEvent::Completed {
            return Ok(());
        }
        let fields = parse_completed_fields(event)?;
        self.process_completed_order(event.order_id, fields).await
    }

    /// Steps 1-4 of spec.md §4.7.
    pub async fn process_completed_order(&self, order_id: Uuid, fields: CompletedFields) -> DispatchResult<()> {
        let driver = DriverRepository::find_by_id(&self.pool, fields.driver_id).await?;
        let Some(account) = driver.active_mobile_money() else {
            tracing::warn!(driver_id = %fields.driver_id, %order_id, "driver has no active mobile-money account, dropping payout");
            return Ok(());
        };

        // Idempotent on (order_id, transaction_type): a redelivered
        // COMPLETED event lands on the existing row instead of
        // double-creating one.
        let txn = TransactionRepository::create_idempotent(
            &self.pool,
            fields.driver_id,
            order_id,
            fields.company_id,
            TransactionType::DriverPayment,
            &account.provider,
            fields.final_remuneration,
            &fields.currency,
        )
        .await?;

        if txn.status == TransactionStatus::Pending {
            self.spawn_payout(txn.id, account.clone(), fields.final_remuneration);
        }
        Ok(())
    }

    fn spawn_payout(&self, txn_id: Uuid, account: MobileMoneyAccount, amount: i64) {
        let pool = self.pool.clone();
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            match gateway.initiate_payout(txn_id, &account, amount).await {
                PayoutInitiation::Accepted { reference } => {
                    tracing::info!(%txn_id, %reference, "payout initiated");
                    if let Err(err) =
                        TransactionRepository::update_status(&pool, txn_id, TransactionStatus::Pending, Some(&reference)).await
                    {
                        tracing::error!(%txn_id, error = %err, "failed to record payout reference");
                    }
                }
                PayoutInitiation::Rejected { reason } => {
                    tracing::warn!(%txn_id, %reason, "payout rejected at initiation");
                    if let Err(err) = TransactionRepository::update_status(&pool, txn_id, TransactionStatus::Failed, None).await {
                        tracing::error!(%txn_id, error = %err, "failed to record payout rejection");
                    }
                }
            }
        });
    }

    /// `checkAndUpdatePendingTransaction(txn_id)` from spec.md §4.7:
    /// idempotent, safe to call repeatedly on the same pending
    /// transaction while reconciliation is in flight.
    pub async fn check_and_update_pending_transaction(&self, txn_id: Uuid) -> DispatchResult<OrderTransaction> {
        let txn = TransactionRepository::find_by_id(&self.pool, txn_id).await?;
        if txn.status != TransactionStatus::Pending {
            return Ok(txn);
        }
        let Some(reference) = txn.transaction_reference.clone() else {
            return Ok(txn);
        };
        match self.gateway.check_status(&reference).await {
            PayoutStatusCheck::Pending => Ok(txn),
            PayoutStatusCheck::Success => {
                TransactionRepository::update_status(&self.pool, txn_id, TransactionStatus::Success, None).await
            }
            PayoutStatusCheck::Failed { reason } => {
                tracing::warn!(%txn_id, %reason, "payout reconciliation reported failure");
                TransactionRepository::update_status(&self.pool, txn_id, TransactionStatus::Failed, None).await
            }
        }
    }

    /// Sweep for the reconciliation sub-loop: pending transactions older
    /// than `older_than` get a fresh `checkAndUpdatePendingTransaction`.
    pub async fn reconcile_pending_sweep(&self, older_than: ChronoDuration, limit: i64) -> DispatchResult<usize> {
        let pending = TransactionRepository::find_pending_older_than(&self.pool, older_than, limit).await?;
        let mut reconciled = 0;
        for txn in pending {
            if let Err(err) = self.check_and_update_pending_transaction(txn.id).await {
                tracing::warn!(txn_id = %txn.id, error = %err, "pending transaction reconciliation failed");
                continue;
            }
            reconciled += 1;
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed_event(driver_id: Uuid, remuneration: i64) -> AssignmentEvent {
        AssignmentEvent::new(MissionLifecycleEvent::Completed, Uuid::new_v4())
            .with_field("driverId", driver_id)
            .with_field("finalRemuneration", remuneration)
    }

    #[test]
    fn parses_driver_and_remuneration() {
        let driver_id = Uuid::new_v4();
        let event = completed_event(driver_id, 666);
        let fields = parse_completed_fields(&event).unwrap();
        assert_eq!(fields.driver_id, driver_id);
        assert_eq!(fields.final_remuneration, 666);
        assert_eq!(fields.currency, "XOF");
    }

    #[test]
    fn missing_driver_id_is_rejected() {
        let event = AssignmentEvent::new(MissionLifecycleEvent::Completed, Uuid::new_v4())
            .with_field("finalRemuneration", 100);
        assert!(parse_completed_fields(&event).is_err());
    }

    #[test]
    fn missing_remuneration_is_rejected() {
        let event = AssignmentEvent::new(MissionLifecycleEvent::Completed, Uuid::new_v4())
            .with_field("driverId", Uuid::new_v4());
        assert!(parse_completed_fields(&event).is_err());
    }

    #[test]
    fn currency_defaults_to_xof_when_absent() {
        let event = completed_event(Uuid::new_v4(), 500);
        assert_eq!(parse_completed_fields(&event).unwrap().currency, "XOF");
    }

    #[tokio::test]
    async fn null_gateway_accepts_and_then_reports_success() {
        let gateway = NullPaymentGateway;
        let account = MobileMoneyAccount {
            provider: "orange".into(),
            number: "0700000000".into(),
            status: dispatch_types::MobileMoneyStatus::Active,
        };
        let txn_id = Uuid::new_v4();
        let outcome = gateway.initiate_payout(txn_id, &account, 500).await;
        let reference = match outcome {
            PayoutInitiation::Accepted { reference } => reference,
            other => panic!("expected acceptance, got {other:?}"),
        };
        assert_eq!(gateway.check_status(&reference).await, PayoutStatusCheck::Success);
    }
}

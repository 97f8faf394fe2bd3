use chrono::Utc;
use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::{OrderTransaction, TransactionStatus, TransactionType};
use sqlx::PgPool;
use uuid::Uuid;

use crate::codec::{enum_to_text, text_to_enum};

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    driver_id: Uuid,
    order_id: Uuid,
    company_id: Option<Uuid>,
    transaction_type: String,
    payment_method: String,
    amount: i64,
    currency: String,
    status: String,
    transaction_reference: Option<String>,
    history_status: serde_json::Value,
    metadata: serde_json::Value,
    payment_date: Option<chrono::DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> DispatchResult<OrderTransaction> {
        Ok(OrderTransaction {
            id: self.id,
            driver_id: self.driver_id,
            order_id: self.order_id,
            company_id: self.company_id,
            transaction_type: text_to_enum(&self.transaction_type)?,
            payment_method: self.payment_method,
            amount: self.amount,
            currency: self.currency,
            status: text_to_enum(&self.status)?,
            transaction_reference: self.transaction_reference,
            history_status: serde_json::from_value(self.history_status)
                .map_err(|e| DispatchError::Unrecoverable(e.to_string()))?,
            metadata: self.metadata,
            payment_date: self.payment_date,
        })
    }
}

const TRANSACTION_COLUMNS: &str = r#"
    id, driver_id, order_id, company_id, transaction_type, payment_method, amount,
    currency, status, transaction_reference, history_status, metadata, payment_date
"#;

pub struct TransactionRepository;

impl TransactionRepository {
    /// Idempotent on `(order_id, transaction_type)`: a billing-worker
    /// retry after a crash between insert and ack lands on the existing
    /// row instead of double-paying the driver (spec.md §4.6).
    pub async fn create_idempotent(
        pool: &PgPool,
        driver_id: Uuid,
        order_id: Uuid,
        company_id: Option<Uuid>,
        transaction_type: TransactionType,
        payment_method: &str,
        amount: i64,
        currency: &str,
    ) -> DispatchResult<OrderTransaction> {
        let query = format!(
            r#"
            INSERT INTO order_transactions (
                driver_id, order_id, company_id, transaction_type, payment_method,
                amount, currency, status, history_status, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', '[]'::jsonb, '{{}}'::jsonb)
            ON CONFLICT (order_id, transaction_type) DO NOTHING
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(driver_id)
            .bind(order_id)
            .bind(company_id)
            .bind(enum_to_text(&transaction_type)?)
            .bind(payment_method)
            .bind(amount)
            .bind(currency)
            .fetch_optional(pool)
            .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                let query = format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM order_transactions WHERE order_id = $1 AND transaction_type = $2"
                );
                sqlx::query_as::<_, TransactionRow>(&query)
                    .bind(order_id)
                    .bind(enum_to_text(&transaction_type)?)
                    .fetch_one(pool)
                    .await?
            }
        };
        row.into_domain()
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> DispatchResult<OrderTransaction> {
        let query = format!("SELECT {TRANSACTION_COLUMNS} FROM order_transactions WHERE id = $1");
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("transaction {id} not found")))?;
        row.into_domain()
    }

    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        status: TransactionStatus,
        transaction_reference: Option<&str>,
    ) -> DispatchResult<OrderTransaction> {
        let query = format!(
            r#"
            UPDATE order_transactions
            SET status = $1,
                transaction_reference = COALESCE($2, transaction_reference),
                payment_date = CASE WHEN $1 = 'success' THEN NOW() ELSE payment_date END,
                history_status = history_status || jsonb_build_object('status', $1, 'timestamp', NOW())::jsonb
            WHERE id = $3
            RETURNING {TRANSACTION_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TransactionRow>(&query)
            .bind(enum_to_text(&status)?)
            .bind(transaction_reference)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("transaction {id} not found")))?;
        row.into_domain()
    }

    pub async fn find_pending_older_than(
        pool: &PgPool,
        older_than: chrono::Duration,
        limit: i64,
    ) -> DispatchResult<Vec<OrderTransaction>> {
        let cutoff = Utc::now() - older_than;
        let query = format!(
            r#"SELECT {TRANSACTION_COLUMNS} FROM order_transactions
               WHERE status = 'pending' AND created_at <= $1 ORDER BY created_at ASC LIMIT $2"#
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&query).bind(cutoff).bind(limit).fetch_all(pool).await?;
        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

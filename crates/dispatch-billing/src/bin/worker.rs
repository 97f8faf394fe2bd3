use std::sync::Arc;
use std::time::Duration;

use dispatch_billing::{BillingWorker, NullPaymentGateway, ASSIGNMENT_EVENTS_STREAM, BILLING_CONSUMER_GROUP};
use dispatch_common::{BillingWorkerSettings, ConnectionSettings, ShutdownSignal};
use dispatch_eventlog::EventLog;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_common::config::load_dotenv();
    dispatch_common::init_tracing("dispatch-billing-worker");

    let connections = ConnectionSettings::from_env()?;
    let settings = BillingWorkerSettings::from_env();

    let pool = PgPoolOptions::new().max_connections(10).connect(&connections.database_url).await?;
    let redis_cfg = deadpool_redis::Config::from_url(&connections.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    let event_log = EventLog::new(redis_pool, ASSIGNMENT_EVENTS_STREAM);
    event_log.ensure_group(BILLING_CONSUMER_GROUP).await?;

    let consumer_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "billing-worker-1".to_string());
    let worker = Arc::new(BillingWorker::new(pool, Arc::new(NullPaymentGateway)));

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let reconcile_worker = worker.clone();
    let reconcile_shutdown = shutdown.clone();
    let reconcile_interval = Duration::from_millis(settings.reconciliation_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        while !reconcile_shutdown.is_shutting_down() {
            ticker.tick().await;
            match reconcile_worker.reconcile_pending_sweep(chrono::Duration::minutes(5), 200).await {
                Ok(reconciled) if reconciled > 0 => tracing::info!(reconciled, "reconciled pending transactions"),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "pending transaction reconciliation sweep failed"),
            }
        }
    });

    tracing::info!(consumer = %consumer_name, "billing worker started");
    while !shutdown.is_shutting_down() {
        let deliveries = match event_log
            .read_group(BILLING_CONSUMER_GROUP, &consumer_name, settings.max_per_poll, Duration::from_millis(settings.poll_block_timeout_ms))
            .await
        {
            Ok(deliveries) => deliveries,
            Err(err) => {
                tracing::error!(error = %err, "stream read failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        for delivery in deliveries {
            let ack = match worker.handle_event(&delivery.event).await {
                Ok(()) => true,
                Err(err) if err.is_ack_and_drop() => {
                    tracing::warn!(error = %err, order_id = %delivery.event.order_id, "dropping billing event");
                    true
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(error = %err, order_id = %delivery.event.order_id, "retryable billing failure, leaving pending");
                    false
                }
                Err(err) => {
                    tracing::error!(error = %err, order_id = %delivery.event.order_id, "unexpected billing failure");
                    false
                }
            };
            if ack {
                event_log.ack(BILLING_CONSUMER_GROUP, &[delivery.entry_id]).await.ok();
            }
        }
    }

    tracing::info!("billing worker shutting down");
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use dispatch_assignment::{AssignmentEngine, ASSIGNMENT_CONSUMER_GROUP, ASSIGNMENT_EVENTS_STREAM};
use dispatch_common::{AssignmentSettings, ConnectionSettings, ShutdownSignal, SystemClock};
use dispatch_db::PgAvailabilityStore;
use dispatch_eventlog::EventLog;
use dispatch_routing::{HttpRouting, NullRouting, Routing};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_common::config::load_dotenv();
    dispatch_common::init_tracing("dispatch-assignment-worker");

    let connections = ConnectionSettings::from_env()?;
    let settings = AssignmentSettings::from_env();

    let pool = PgPoolOptions::new().max_connections(10).connect(&connections.database_url).await?;
    let redis_cfg = deadpool_redis::Config::from_url(&connections.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    let event_log = EventLog::new(redis_pool, ASSIGNMENT_EVENTS_STREAM);
    event_log.ensure_group(ASSIGNMENT_CONSUMER_GROUP).await?;

    let consumer_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "assignment-worker-1".to_string());
    let availability_store = PgAvailabilityStore::new(pool.clone());
    let routing: Arc<dyn Routing> = match std::env::var("ROUTING_BASE_URL") {
        Ok(base_url) => Arc::new(HttpRouting::new(base_url)),
        Err(_) => Arc::new(NullRouting),
    };
    let engine = Arc::new(AssignmentEngine::new(
        pool.clone(),
        event_log.clone(),
        settings.clone(),
        Arc::new(SystemClock),
        routing,
        availability_store,
    ));

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let expirer_engine = engine.clone();
    let expirer_shutdown = shutdown.clone();
    let expirer_interval = Duration::from_millis(settings.offer_expiration_scan_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(expirer_interval);
        while !expirer_shutdown.is_shutting_down() {
            ticker.tick().await;
            if let Err(err) = expirer_engine.run_expirer_sweep(200).await {
                tracing::error!(error = %err, "expirer sweep failed");
            }
        }
    });

    tracing::info!(consumer = %consumer_name, "assignment worker started");
    while !shutdown.is_shutting_down() {
        let deliveries = match event_log
            .read_group(ASSIGNMENT_CONSUMER_GROUP, &consumer_name, 10, Duration::from_secs(5))
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
            let ack = match engine.handle_event(&delivery.event).await {
                Ok(()) => true,
                Err(err) if err.is_ack_and_drop() => {
                    tracing::warn!(error = %err, order_id = %delivery.event.order_id, "dropping event");
                    true
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(error = %err, order_id = %delivery.event.order_id, "retryable failure, leaving pending");
                    false
                }
                Err(err) => {
                    tracing::error!(error = %err, order_id = %delivery.event.order_id, "unexpected failure handling event");
                    false
                }
            };
            if ack {
                event_log.ack(ASSIGNMENT_CONSUMER_GROUP, &[delivery.entry_id]).await.ok();
            }
        }
    }

    tracing::info!("assignment worker shutting down");
    Ok(())
}

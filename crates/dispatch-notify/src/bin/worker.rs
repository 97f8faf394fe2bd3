use std::sync::Arc;
use std::time::Duration;

use dispatch_common::{ConnectionSettings, NotificationWorkerSettings, ShutdownSignal};
use dispatch_eventlog::EventLog;
use dispatch_notify::{
    HttpPushSink, NotificationWorker, NullPushSink, PushSink, NOTIFICATION_CONSUMER_GROUP,
    NOTIFICATION_EVENTS_STREAM,
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_common::config::load_dotenv();
    dispatch_common::init_tracing("dispatch-notify-worker");

    let connections = ConnectionSettings::from_env()?;
    let settings = NotificationWorkerSettings::from_env();

    let pool = PgPoolOptions::new().max_connections(10).connect(&connections.database_url).await?;
    let redis_cfg = deadpool_redis::Config::from_url(&connections.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    let event_log = EventLog::new(redis_pool, NOTIFICATION_EVENTS_STREAM);
    event_log.ensure_group(NOTIFICATION_CONSUMER_GROUP).await?;

    let consumer_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "notify-worker-1".to_string());
    let sink: Arc<dyn PushSink> = match std::env::var("FCM_ENDPOINT") {
        Ok(endpoint) => Arc::new(HttpPushSink::new(endpoint)),
        Err(_) => {
            tracing::warn!("FCM_ENDPOINT not set, push delivery is a no-op");
            Arc::new(NullPushSink)
        }
    };

    let worker = Arc::new(NotificationWorker::new(pool, event_log.clone(), settings.clone(), sink, consumer_name.clone()));

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let reaper = worker.clone();
    let reaper_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        while !reaper_shutdown.is_shutting_down() {
            ticker.tick().await;
            match reaper.reap_dead_consumers().await {
                Ok(reaped) if !reaped.is_empty() => {
                    tracing::info!(consumers = ?reaped, "reaped dead notification consumers")
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "dead consumer reap failed"),
            }
        }
    });

    tracing::info!(consumer = %consumer_name, "notification worker started");
    let mut found_claimable_last_sweep = false;
    while !shutdown.is_shutting_down() {
        let claimed = match worker.maybe_claim(found_claimable_last_sweep).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::error!(error = %err, "claim sweep failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        found_claimable_last_sweep = !claimed.is_empty();
        for (delivery, times_delivered) in claimed {
            if let Err(err) = worker.process_delivery(&delivery, times_delivered).await {
                tracing::error!(error = %err, entry_id = %delivery.entry_id, "failed processing claimed delivery");
            }
        }

        let fresh = match worker.read_new().await {
            Ok(fresh) => fresh,
            Err(err) => {
                tracing::error!(error = %err, "stream read failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        for delivery in fresh {
            if let Err(err) = worker.process_delivery(&delivery, 1).await {
                tracing::error!(error = %err, entry_id = %delivery.entry_id, "failed processing delivery");
            }
        }
    }

    tracing::info!("notification worker shutting down");
    Ok(())
}

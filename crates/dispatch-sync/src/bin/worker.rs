use std::time::Duration;

use dispatch_common::{AvailabilitySyncSettings, ConnectionSettings, ShutdownSignal};
use dispatch_eventlog::EventLog;
use dispatch_notify::NOTIFICATION_EVENTS_STREAM;
use dispatch_sync::{AvailabilitySynchronizer, HeartbeatMonitor, RedisAvailabilityCache};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_common::config::load_dotenv();
    dispatch_common::init_tracing("dispatch-sync-worker");

    let connections = ConnectionSettings::from_env()?;
    let settings = AvailabilitySyncSettings::from_env();

    let pool = PgPoolOptions::new().max_connections(10).connect(&connections.database_url).await?;
    let redis_cfg = deadpool_redis::Config::from_url(&connections.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    let cache = RedisAvailabilityCache::new(redis_pool.clone());
    let event_log = EventLog::new(redis_pool, NOTIFICATION_EVENTS_STREAM);
    let synchronizer = AvailabilitySynchronizer::new(pool.clone(), cache, event_log, settings.clone());
    let heartbeat_monitor = HeartbeatMonitor::new(pool, settings.clone());

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let heartbeat_shutdown = shutdown.clone();
    let heartbeat_interval = Duration::from_millis(settings.heartbeat_scan_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        while !heartbeat_shutdown.is_shutting_down() {
            ticker.tick().await;
            match heartbeat_monitor.run_sweep().await {
                Ok(forced) if forced > 0 => tracing::info!(forced, "heartbeat monitor forced drivers inactive"),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "heartbeat monitor sweep failed"),
            }
        }
    });

    tracing::info!(
        worker_id = settings.worker_id,
        total_workers = settings.total_workers,
        "availability synchronizer started"
    );
    let sync_interval = Duration::from_millis(settings.interval_ms);
    let mut ticker = tokio::time::interval(sync_interval);
    while !shutdown.is_shutting_down() {
        ticker.tick().await;
        match synchronizer.run_sweep().await {
            Ok(stats) => tracing::info!(
                checked = stats.checked,
                flipped = stats.flipped,
                failed = stats.failed,
                "availability sync sweep complete"
            ),
            Err(err) => tracing::error!(error = %err, "availability sync sweep failed"),
        }
    }

    tracing::info!("availability synchronizer shutting down");
    Ok(())
}

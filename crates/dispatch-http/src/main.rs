mod auth;
mod error;
mod realtime;
mod routes;
mod state;

use std::sync::Arc;

use dispatch_assignment::{AssignmentEngine, ASSIGNMENT_CONSUMER_GROUP, ASSIGNMENT_EVENTS_STREAM};
use dispatch_common::{AssignmentSettings, ConnectionSettings, HttpSettings, SystemClock};
use dispatch_db::PgAvailabilityStore;
use dispatch_eventlog::EventLog;
use dispatch_routing::{HttpRouting, NullRouting, Routing};
use sqlx::postgres::PgPoolOptions;

use crate::realtime::TrackHub;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispatch_common::config::load_dotenv();
    dispatch_common::init_tracing("dispatch-http");

    let connections = ConnectionSettings::from_env()?;
    let assignment_settings = AssignmentSettings::from_env();
    let http_settings = HttpSettings::from_env();

    let pool = PgPoolOptions::new().max_connections(10).connect(&connections.database_url).await?;
    // dispatch-http owns schema migration; the worker binaries assume an
    // already-migrated database so a rolling deploy never races two
    // processes over the same migration lock.
    sqlx::migrate!("../../migrations").run(&pool).await?;
    let redis_cfg = deadpool_redis::Config::from_url(&connections.redis_url);
    let redis_pool = redis_cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    let assignment_events = EventLog::new(redis_pool, ASSIGNMENT_EVENTS_STREAM);
    assignment_events.ensure_group(ASSIGNMENT_CONSUMER_GROUP).await?;

    // A routing base URL configures the real HTTP-backed adapter; its
    // absence falls back to the deterministic straight-line double so a
    // local checkout runs without Valhalla/Nominatim wired up.
    let routing: Arc<dyn Routing> = match std::env::var("ROUTING_BASE_URL") {
        Ok(base_url) => Arc::new(HttpRouting::new(base_url)),
        Err(_) => Arc::new(NullRouting),
    };

    let availability_store = PgAvailabilityStore::new(pool.clone());
    let engine = Arc::new(AssignmentEngine::new(
        pool.clone(),
        assignment_events.clone(),
        assignment_settings.clone(),
        Arc::new(SystemClock),
        routing.clone(),
        availability_store,
    ));

    let state = AppState {
        pool,
        assignment_events,
        engine,
        routing,
        clock: Arc::new(SystemClock),
        rng: Arc::new(dispatch_common::OsRng),
        settings: assignment_settings,
        tracks: TrackHub::new(),
    };

    let app = routes::router(state).layer(tower_http::trace::TraceLayer::new_for_http()).layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", http_settings.bind_host, http_settings.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "dispatch-http listening");
    axum::serve(listener, app).await?;
    Ok(())
}

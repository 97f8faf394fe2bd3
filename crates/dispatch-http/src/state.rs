use std::sync::Arc;

use dispatch_assignment::AssignmentEngine;
use dispatch_common::{AssignmentSettings, Clock, Rng};
use dispatch_db::PgAvailabilityStore;
use dispatch_eventlog::EventLog;
use dispatch_routing::Routing;
use sqlx::PgPool;

use crate::realtime::TrackHub;

/// Everything a handler needs, handed out through axum's `State`
/// extractor. Cloning is cheap: every field is either a pool or an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub assignment_events: EventLog,
    pub engine: Arc<AssignmentEngine<PgAvailabilityStore>>,
    pub routing: Arc<dyn Routing>,
    pub clock: Arc<dyn Clock>,
    pub rng: Arc<dyn Rng>,
    pub settings: AssignmentSettings,
    pub tracks: TrackHub,
}

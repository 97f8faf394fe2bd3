use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DispatchError;

fn var(key: &str) -> Result<String, DispatchError> {
    env::var(key).map_err(|_| DispatchError::Fatal(format!("missing required config key: {key}")))
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Database and event-log connection settings, common to every worker and
/// the HTTP boundary. Loaded from the environment (`dotenvy::dotenv().ok()`
/// first, so a local `.env` file works the way it does in the teacher's
/// `openhwy-tms-api.rs::main`).
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub database_url: String,
    pub redis_url: String,
}

impl ConnectionSettings {
    pub fn from_env() -> Result<Self, DispatchError> {
        Ok(Self {
            database_url: var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string()),
        })
    }
}

/// spec.md §6 `DRIVER_OFFER_DURATION_SECONDS`, `DRIVER_SEARCH_RADIUS_KM`,
/// `MAX_ASSIGNMENT_ATTEMPTS`, `OFFER_EXPIRATION_SCAN_INTERVAL_MS`,
/// `ASSIGNMENT_EXPIRATION_SCAN_INTERVAL_MS`.
#[derive(Debug, Clone)]
pub struct AssignmentSettings {
    pub driver_offer_duration_seconds: i64,
    pub driver_search_radius_km: f64,
    pub max_assignment_attempts: u32,
    pub offer_expiration_scan_interval_ms: u64,
    pub assignment_expiration_scan_interval_ms: u64,
    pub retry_backoff_seconds: u64,
}

impl AssignmentSettings {
    pub fn from_env() -> Self {
        Self {
            driver_offer_duration_seconds: var_or("DRIVER_OFFER_DURATION_SECONDS", 90),
            driver_search_radius_km: var_or("DRIVER_SEARCH_RADIUS_KM", 7.0),
            max_assignment_attempts: var_or("MAX_ASSIGNMENT_ATTEMPTS", 5),
            offer_expiration_scan_interval_ms: var_or("OFFER_EXPIRATION_SCAN_INTERVAL_MS", 5_000),
            assignment_expiration_scan_interval_ms: var_or("ASSIGNMENT_EXPIRATION_SCAN_INTERVAL_MS", 5_000),
            retry_backoff_seconds: var_or("RETRY_BACKOFF_S", 15),
        }
    }

    pub fn offer_duration(&self) -> Duration {
        Duration::from_secs(self.driver_offer_duration_seconds.max(0) as u64)
    }
}

/// spec.md §6 `NOTIFICATION_WORKER_*` family.
#[derive(Debug, Clone)]
pub struct NotificationWorkerSettings {
    pub poll_block_timeout_ms: u64,
    pub max_per_poll: usize,
    pub claim_check_frequency: u32,
    pub idle_timeout_before_claim_ms: i64,
    pub max_retry_before_deadletter: u32,
    pub dead_consumer_idle_threshold_ms: i64,
}

impl NotificationWorkerSettings {
    pub fn from_env() -> Self {
        Self {
            poll_block_timeout_ms: var_or("NOTIFICATION_WORKER_BLOCK_TIMEOUT_MS", 5_000),
            max_per_poll: var_or("NOTIFICATION_WORKER_MAX_PER_POLL", 10),
            claim_check_frequency: var_or("NOTIFICATION_WORKER_CHECK_FREQUENCY", 10),
            idle_timeout_before_claim_ms: var_or("NOTIFICATION_WORKER_CLAIM_IDLE_MS", 30_000),
            max_retry_before_deadletter: var_or("NOTIFICATION_WORKER_MAX_RETRY", 5),
            dead_consumer_idle_threshold_ms: var_or("NOTIFICATION_WORKER_DEAD_CONSUMER_IDLE_MS", 300_000),
        }
    }
}

/// spec.md §6 `AVAILABILITY_SYNC_*` family.
#[derive(Debug, Clone)]
pub struct AvailabilitySyncSettings {
    pub interval_ms: u64,
    pub batch_size: usize,
    pub total_workers: u32,
    pub worker_id: u32,
    pub cache_ttl_seconds: u64,
    pub heartbeat_scan_interval_ms: u64,
    pub heartbeat_ttl_seconds: u64,
}

impl AvailabilitySyncSettings {
    pub fn from_env() -> Self {
        Self {
            interval_ms: var_or("AVAILABILITY_SYNC_INTERVAL_MS", 60_000),
            batch_size: var_or("AVAILABILITY_SYNC_BATCH_SIZE", 200),
            total_workers: var_or("AVAILABILITY_SYNC_TOTAL_WORKERS", 1),
            worker_id: var_or("AVAILABILITY_SYNC_WORKER_ID", 0),
            cache_ttl_seconds: var_or("AVAILABILITY_SYNC_CACHE_TTL", 300),
            heartbeat_scan_interval_ms: var_or("HEARTBEAT_SCAN_INTERVAL_MS", 60_000),
            heartbeat_ttl_seconds: var_or("HEARTBEAT_TTL_SECONDS", 120),
        }
    }
}

/// spec.md §6 `BILLING_WORKER_*` family.
#[derive(Debug, Clone)]
pub struct BillingWorkerSettings {
    pub poll_block_timeout_ms: u64,
    pub max_per_poll: usize,
    pub reconciliation_interval_ms: u64,
}

impl BillingWorkerSettings {
    pub fn from_env() -> Self {
        Self {
            poll_block_timeout_ms: var_or("BILLING_WORKER_BLOCK_TIMEOUT_MS", 5_000),
            max_per_poll: var_or("BILLING_WORKER_MAX_PER_POLL", 10),
            reconciliation_interval_ms: var_or("BILLING_WORKER_RECONCILIATION_INTERVAL_MS", 60_000),
        }
    }
}

/// Settings for the `dispatch-http` boundary (spec.md §6). Not a named
/// configuration family in §6's list since the HTTP server's own bind
/// address isn't a core-engine concern, but every other binary in this
/// workspace reads its port/host the same way.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub bind_host: String,
    pub bind_port: u16,
}

impl HttpSettings {
    pub fn from_env() -> Self {
        Self {
            bind_host: env::var("HTTP_BIND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            bind_port: var_or("HTTP_BIND_PORT", 8080),
        }
    }
}

pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

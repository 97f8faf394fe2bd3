use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a structured, env-filterable tracing subscriber. Every worker
/// binary calls this first thing in `main`, matching the
/// `tracing_subscriber::fmt::init()` call in `openhwy-tms-api.rs::main`,
/// generalized to accept a per-service name for the `service` field.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();

    tracing::info!(service = service_name, "telemetry initialized");
}

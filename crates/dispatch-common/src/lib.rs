pub mod clock;
pub mod config;
pub mod error;
pub mod rng;
pub mod shutdown;
pub mod telemetry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    AssignmentSettings, AvailabilitySyncSettings, BillingWorkerSettings, ConnectionSettings, HttpSettings,
    NotificationWorkerSettings,
};
pub use error::{DispatchError, DispatchResult};
pub use rng::{OsRng, Rng, SeededRng};
pub use shutdown::ShutdownSignal;
pub use telemetry::init_tracing;

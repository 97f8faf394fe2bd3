//! Postgres repositories, one module per persisted entity, in the
//! `XRepository::method(pool, ...)` shape used throughout this stack.

pub mod availability;
pub mod codec;
pub mod driver;
pub mod order;
pub mod route_leg;
pub mod transaction;

pub use availability::{AvailabilityRuleRepository, PgAvailabilityStore};
pub use driver::DriverRepository;
pub use order::OrderRepository;
pub use route_leg::{legs_from_trip, origin_leg, RouteLegRepository};
pub use transaction::TransactionRepository;

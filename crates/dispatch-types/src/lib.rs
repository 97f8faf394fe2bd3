pub mod availability;
pub mod driver;
pub mod event;
pub mod geo;
pub mod notification;
pub mod order;
pub mod package;
pub mod realtime;
pub mod transaction;
pub mod waypoint;

pub use availability::{AvailabilityException, AvailabilityRule};
pub use driver::{Driver, DriverStatus, DriverStatusLogEntry, MobileMoneyAccount, MobileMoneyStatus};
pub use event::{AssignmentEvent, MissionLifecycleEvent};
pub use geo::{GeoPoint, LineString};
pub use notification::{NotificationType, PushMessage};
pub use order::{Order, OrderPhase, OrderPriority, OrderStatusLogEntry, OrderStatusLogMetadata};
pub use package::Package;
pub use realtime::TrackStreamPayload;
pub use transaction::{OrderTransaction, TransactionHistoryEntry, TransactionStatus, TransactionType};
pub use waypoint::{Maneuver, OrderRouteLeg, WaypointStatus, WaypointSummaryItem, WaypointType};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Authoritative event-name set for the `assignment_events` stream.
/// DESIGN.md resolves the source's two divergent `RedisHelper`
/// implementations in favor of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionLifecycleEvent {
    NewOrderReadyForAssignment,
    NewOfferProposed,
    OfferAcceptedByDriver,
    OfferRefusedByDriver,
    OfferExpiredForDriver,
    ManuallyAssigned,
    Completed,
    CancelledByAdmin,
    CancelledBySystem,
    Failed,
}

impl MissionLifecycleEvent {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::NewOrderReadyForAssignment => "mission_new_order_ready_for_assignment",
            Self::NewOfferProposed => "mission_new_offer_proposed",
            Self::OfferAcceptedByDriver => "mission_offer_accepted_by_driver",
            Self::OfferRefusedByDriver => "mission_offer_refused_by_driver",
            Self::OfferExpiredForDriver => "mission_offer_expired_for_driver",
            Self::ManuallyAssigned => "mission_manually_assigned",
            Self::Completed => "mission_completed",
            Self::CancelledByAdmin => "mission_cancelled_by_admin",
            Self::CancelledBySystem => "mission_cancelled_by_system",
            Self::Failed => "mission_failed",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Some(match name {
            "mission_new_order_ready_for_assignment" => Self::NewOrderReadyForAssignment,
            "mission_new_offer_proposed" => Self::NewOfferProposed,
            "mission_offer_accepted_by_driver" => Self::OfferAcceptedByDriver,
            "mission_offer_refused_by_driver" => Self::OfferRefusedByDriver,
            "mission_offer_expired_for_driver" => Self::OfferExpiredForDriver,
            "mission_manually_assigned" => Self::ManuallyAssigned,
            "mission_completed" => Self::Completed,
            "mission_cancelled_by_admin" => Self::CancelledByAdmin,
            "mission_cancelled_by_system" => Self::CancelledBySystem,
            "mission_failed" => Self::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::CancelledByAdmin | Self::CancelledBySystem | Self::Completed | Self::Failed
        )
    }
}

/// A flat record of string pairs, as required by spec.md §6: every event
/// carries at minimum `{type, orderId, timestamp}`, plus whatever
/// additional fields a given event kind needs (e.g. `driverId`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub kind: MissionLifecycleEvent,
    pub order_id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub fields: HashMap<String, String>,
}

impl AssignmentEvent {
    pub fn new(kind: MissionLifecycleEvent, order_id: Uuid) -> Self {
        Self {
            kind,
            order_id,
            timestamp: chrono::Utc::now(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Flattens into the wire representation the event log actually
    /// transports: a map of string/string pairs.
    pub fn to_wire(&self) -> HashMap<String, String> {
        let mut map = self.fields.clone();
        map.insert("type".to_string(), self.kind.wire_name().to_string());
        map.insert("orderId".to_string(), self.order_id.to_string());
        map.insert("timestamp".to_string(), self.timestamp.to_rfc3339());
        map
    }

    pub fn from_wire(map: &HashMap<String, String>) -> Option<Self> {
        let kind = MissionLifecycleEvent::from_wire_name(map.get("type")?)?;
        let order_id = Uuid::parse_str(map.get("orderId")?).ok()?;
        let timestamp = map
            .get("timestamp")
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let mut fields = map.clone();
        fields.remove("type");
        fields.remove("orderId");
        fields.remove("timestamp");
        Some(Self { kind, order_id, timestamp, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_kind_order_and_fields() {
        let order_id = Uuid::new_v4();
        let event = AssignmentEvent::new(MissionLifecycleEvent::OfferAcceptedByDriver, order_id)
            .with_field("driverId", Uuid::new_v4());
        let wire = event.to_wire();
        let back = AssignmentEvent::from_wire(&wire).unwrap();
        assert_eq!(back.kind, event.kind);
        assert_eq!(back.order_id, event.order_id);
        assert_eq!(back.field("driverId"), event.field("driverId"));
    }

    #[test]
    fn unknown_type_does_not_parse() {
        let mut map = HashMap::new();
        map.insert("type".to_string(), "not_a_real_event".to_string());
        map.insert("orderId".to_string(), Uuid::new_v4().to_string());
        assert!(AssignmentEvent::from_wire(&map).is_none());
    }
}

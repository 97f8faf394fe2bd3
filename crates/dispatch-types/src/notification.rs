use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewMissionOffer,
    OrderStatusChanged,
    DriverAvailabilityChanged,
    PayoutUpdated,
}

impl NotificationType {
    /// spec.md §4.6: `NEW_MISSION_OFFER` gets high priority / high-urgency
    /// channel / distinctive sound; everything else is normal.
    pub fn is_high_urgency(self) -> bool {
        matches!(self, NotificationType::NewMissionOffer)
    }
}

/// The message body carried on the notification stream, per spec.md §4.6:
/// `{fcmToken, title, body, data(JSON), type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub fcm_token: String,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, serde_json::Value>,
    pub notification_type: NotificationType,
}

impl PushMessage {
    /// All FCM data values must be string-coerced: numbers/booleans become
    /// `String`, objects become their JSON text.
    pub fn coerced_data(&self) -> HashMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| {
                let s = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), s)
            })
            .collect()
    }

    /// Flattens to the flat string/string wire shape the notification
    /// stream transports (spec.md §4.6), matching
    /// `AssignmentEvent::to_wire`'s convention.
    pub fn to_wire(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("fcmToken".to_string(), self.fcm_token.clone());
        map.insert("title".to_string(), self.title.clone());
        map.insert("body".to_string(), self.body.clone());
        map.insert("data".to_string(), serde_json::to_string(&self.data).unwrap_or_default());
        map.insert("type".to_string(), serde_json::to_value(self.notification_type).map(|v| v.as_str().unwrap_or_default().to_string()).unwrap_or_default());
        map
    }

    pub fn from_wire(map: &HashMap<String, String>) -> Option<Self> {
        let fcm_token = map.get("fcmToken")?.clone();
        let title = map.get("title").cloned().unwrap_or_default();
        let body = map.get("body").cloned().unwrap_or_default();
        let data = map
            .get("data")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let notification_type = map
            .get("type")
            .and_then(|s| serde_json::from_value(serde_json::Value::String(s.clone())).ok())?;
        Some(Self { fcm_token, title, body, data, notification_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_values_are_stringified() {
        let mut data = HashMap::new();
        data.insert("count".to_string(), serde_json::json!(3));
        data.insert("urgent".to_string(), serde_json::json!(true));
        data.insert("meta".to_string(), serde_json::json!({"a": 1}));
        data.insert("label".to_string(), serde_json::json!("hello"));
        let msg = PushMessage {
            fcm_token: "tok".into(),
            title: "t".into(),
            body: "b".into(),
            data,
            notification_type: NotificationType::OrderStatusChanged,
        };
        let coerced = msg.coerced_data();
        assert_eq!(coerced.get("count").unwrap(), "3");
        assert_eq!(coerced.get("urgent").unwrap(), "true");
        assert_eq!(coerced.get("label").unwrap(), "hello");
        assert!(coerced.get("meta").unwrap().contains("\"a\":1"));
    }

    #[test]
    fn new_mission_offer_is_high_urgency() {
        assert!(NotificationType::NewMissionOffer.is_high_urgency());
        assert!(!NotificationType::OrderStatusChanged.is_high_urgency());
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let mut data = HashMap::new();
        data.insert("orderId".to_string(), serde_json::json!("abc-123"));
        let msg = PushMessage {
            fcm_token: "tok".into(),
            title: "New offer".into(),
            body: "A new mission is available".into(),
            data,
            notification_type: NotificationType::NewMissionOffer,
        };
        let wire = msg.to_wire();
        let back = PushMessage::from_wire(&wire).expect("round trip");
        assert_eq!(back.fcm_token, msg.fcm_token);
        assert_eq!(back.title, msg.title);
        assert_eq!(back.notification_type, msg.notification_type);
        assert_eq!(back.data.get("orderId"), msg.data.get("orderId"));
    }

    #[test]
    fn from_wire_rejects_missing_token() {
        let mut map = HashMap::new();
        map.insert("title".to_string(), "x".to_string());
        assert!(PushMessage::from_wire(&map).is_none());
    }
}

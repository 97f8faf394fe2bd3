//! Real-time fan-out for `GET /track-stream/:order_id` (spec.md §6). A
//! per-order broadcast channel: handlers that mutate an order's status or
//! a driver's location publish here, and the SSE endpoint just subscribes
//! and forwards. Channels are created lazily and dropped once their last
//! subscriber and publisher both go away.

use std::collections::HashMap;
use std::sync::Mutex;

use dispatch_types::TrackStreamPayload;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct TrackHub {
    channels: std::sync::Arc<Mutex<HashMap<Uuid, broadcast::Sender<TrackStreamPayload>>>>,
}

impl TrackHub {
    pub fn new() -> Self {
        Self { channels: std::sync::Arc::new(Mutex::new(HashMap::new())) }
    }

    fn sender(&self, order_id: Uuid) -> broadcast::Sender<TrackStreamPayload> {
        let mut channels = self.channels.lock().expect("track hub mutex poisoned");
        channels
            .entry(order_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes a payload for `order_id`. A send with no subscribers is
    /// not an error — nobody has the track-stream open yet.
    pub fn publish(&self, order_id: Uuid, payload: TrackStreamPayload) {
        let _ = self.sender(order_id).send(payload);
    }

    pub fn subscribe(&self, order_id: Uuid) -> broadcast::Receiver<TrackStreamPayload> {
        self.sender(order_id).subscribe()
    }
}

impl Default for TrackHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let hub = TrackHub::new();
        let order_id = Uuid::new_v4();
        let mut rx = hub.subscribe(order_id);
        hub.publish(
            order_id,
            TrackStreamPayload::StatusUpdated {
                order_id,
                client_id: Uuid::new_v4(),
                new_status: "AT_PICKUP".into(),
                timestamp: chrono::Utc::now(),
                log_entry: None,
            },
        );
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, TrackStreamPayload::StatusUpdated { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let hub = TrackHub::new();
        hub.publish(
            Uuid::new_v4(),
            TrackStreamPayload::DriverLocationUpdated {
                order_id: Uuid::new_v4(),
                client_id: Uuid::new_v4(),
                driver_id: Uuid::new_v4(),
                location: dispatch_types::GeoPoint::new(0.0, 0.0),
                timestamp: chrono::Utc::now(),
                eta_seconds: None,
            },
        );
    }
}

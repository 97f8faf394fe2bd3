//! The push pipeline from spec.md §4.6: a reliable consumer over the
//! notification stream with claim/read/process sub-loops, FCM token
//! invalidation, retry-to-dead-letter, and dead-consumer reaping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_common::{DispatchResult, NotificationWorkerSettings};
use dispatch_db::DriverRepository;
use dispatch_eventlog::{EventLog, RawDelivery};
use dispatch_types::{NotificationType, PushMessage};
use sqlx::PgPool;
use uuid::Uuid;

pub const NOTIFICATION_EVENTS_STREAM: &str = "notification_events";
pub const NOTIFICATION_CONSUMER_GROUP: &str = "notification_workers_group";
pub const NOTIFICATION_DLQ_STREAM: &str = "notification_events_dlq";

/// Result of attempting to hand a message to the push gateway. Mirrors
/// the outcome classes spec.md §4.6 step 4 enumerates.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Success,
    /// FCM's `registration-token-not-registered` (or equivalent).
    InvalidToken,
    /// Parse/validation error in the message itself — a poison pill,
    /// acked without retry.
    PermanentFailure(String),
    /// Rate-limit, network blip, upstream 5xx — worth redelivering.
    RecoverableFailure(String),
}

#[async_trait]
pub trait PushSink: Send + Sync {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        high_urgency: bool,
    ) -> PushOutcome;
}

/// Test double: every send succeeds, no network calls. Also useful as a
/// local-dev fallback when no FCM credentials are configured.
pub struct NullPushSink;

#[async_trait]
impl PushSink for NullPushSink {
    async fn send(
        &self,
        _token: &str,
        _title: &str,
        _body: &str,
        _data: &HashMap<String, String>,
        _high_urgency: bool,
    ) -> PushOutcome {
        PushOutcome::Success
    }
}

/// Adapter stub for the real FCM HTTP v1 API. FCM delivery itself is out
/// of scope (spec.md §1); this wires the token-invalidation and
/// recoverable-vs-permanent classification spec.md §4.6 requires around
/// whichever project/credentials are configured.
pub struct HttpPushSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into() }
    }
}

#[async_trait]
impl PushSink for HttpPushSink {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: &HashMap<String, String>,
        high_urgency: bool,
    ) -> PushOutcome {
        let body_json = serde_json::json!({
            "message": {
                "token": token,
                "notification": { "title": title, "body": body },
                "data": data,
                "android": { "priority": if high_urgency { "high" } else { "normal" } },
            }
        });
        match self.client.post(&self.endpoint).json(&body_json).send().await {
            Ok(resp) if resp.status().is_success() => PushOutcome::Success,
            Ok(resp) if resp.status().as_u16() == 404 => PushOutcome::InvalidToken,
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                if text.contains("registration-token-not-registered") || text.contains("UNREGISTERED") {
                    PushOutcome::InvalidToken
                } else if status.is_client_error() {
                    PushOutcome::PermanentFailure(format!("fcm rejected message: {status}"))
                } else {
                    PushOutcome::RecoverableFailure(format!("fcm returned {status}"))
                }
            }
            Err(err) => PushOutcome::RecoverableFailure(err.to_string()),
        }
    }
}

/// What a worker does with the stream entry after interpreting a
/// [`PushOutcome`]. Split out as a pure function so the retry/dead-letter
/// threshold logic is testable without a Redis connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Ack,
    AckAndClearToken,
    AckAndDeadLetter(String),
    LeavePending,
}

pub fn decide_action(outcome: &PushOutcome, times_delivered: usize, max_retry_before_deadletter: u32) -> Action {
    match outcome {
        PushOutcome::Success => Action::Ack,
        PushOutcome::InvalidToken => Action::AckAndClearToken,
        PushOutcome::PermanentFailure(_) => Action::Ack,
        PushOutcome::RecoverableFailure(reason) => {
            if times_delivered as u32 >= max_retry_before_deadletter {
                Action::AckAndDeadLetter(reason.clone())
            } else {
                Action::LeavePending
            }
        }
    }
}

pub struct NotificationWorker {
    pool: PgPool,
    event_log: EventLog,
    settings: NotificationWorkerSettings,
    sink: Arc<dyn PushSink>,
    consumer_name: String,
    idle_loops_since_claim: std::sync::atomic::AtomicU32,
}

impl NotificationWorker {
    pub fn new(
        pool: PgPool,
        event_log: EventLog,
        settings: NotificationWorkerSettings,
        sink: Arc<dyn PushSink>,
        consumer_name: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            event_log,
            settings,
            sink,
            consumer_name: consumer_name.into(),
            idle_loops_since_claim: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Step 1 of spec.md §4.6: every `CLAIM_CHECK_FREQUENCY` idle loops,
    /// reclaim entries idle longer than `IDLE_TIMEOUT_BEFORE_CLAIM_MS`.
    /// Returns the reclaimed deliveries paired with their PEL delivery
    /// count, for [`decide_action`]'s retry threshold.
    pub async fn maybe_claim(&self, found_claimable_last_sweep: bool) -> DispatchResult<Vec<(RawDelivery, usize)>> {
        use std::sync::atomic::Ordering;
        let loops = self.idle_loops_since_claim.fetch_add(1, Ordering::Relaxed) + 1;
        if !found_claimable_last_sweep && loops < self.settings.claim_check_frequency {
            return Ok(Vec::new());
        }
        self.idle_loops_since_claim.store(0, Ordering::Relaxed);

        let min_idle = Duration::from_millis(self.settings.idle_timeout_before_claim_ms.max(0) as u64);
        let stale = self
            .event_log
            .pending_details(NOTIFICATION_CONSUMER_GROUP, self.settings.max_per_poll * 4)
            .await?;
        let times_delivered: HashMap<String, usize> =
            stale.iter().filter(|d| d.idle >= min_idle).map(|d| (d.entry_id.clone(), d.times_delivered)).collect();
        if times_delivered.is_empty() {
            return Ok(Vec::new());
        }
        let entry_ids: Vec<String> = times_delivered.keys().cloned().collect();
        let claimed = self
            .event_log
            .claim_stale_raw(NOTIFICATION_CONSUMER_GROUP, &self.consumer_name, min_idle, &entry_ids)
            .await?;
        Ok(claimed
            .into_iter()
            .map(|d| {
                let count = times_delivered.get(&d.entry_id).copied().unwrap_or(1);
                (d, count)
            })
            .collect())
    }

    /// Step 2: block-read new messages for this consumer.
    pub async fn read_new(&self) -> DispatchResult<Vec<RawDelivery>> {
        self.event_log
            .read_group_raw(
                NOTIFICATION_CONSUMER_GROUP,
                &self.consumer_name,
                self.settings.max_per_poll,
                Duration::from_millis(self.settings.poll_block_timeout_ms),
            )
            .await
    }

    /// Steps 3-4: parse, send, interpret, and apply the resulting
    /// [`Action`]. `times_delivered` comes from the PEL row that produced
    /// this delivery (1 for a freshly-read message).
    pub async fn process_delivery(&self, delivery: &RawDelivery, times_delivered: usize) -> DispatchResult<()> {
        let Some(message) = PushMessage::from_wire(&delivery.fields) else {
            tracing::error!(entry_id = %delivery.entry_id, "poison pill: unparseable push message, dropping");
            return self.ack(&delivery.entry_id).await;
        };

        let outcome = self
            .sink
            .send(
                &message.fcm_token,
                &message.title,
                &message.body,
                &message.coerced_data(),
                message.notification_type.is_high_urgency(),
            )
            .await;

        match decide_action(&outcome, times_delivered, self.settings.max_retry_before_deadletter) {
            Action::Ack => self.ack(&delivery.entry_id).await,
            Action::AckAndClearToken => {
                if let Some(driver_id) = driver_id_hint(&message) {
                    if let Err(err) = DriverRepository::clear_push_token(&self.pool, driver_id).await {
                        tracing::warn!(%driver_id, error = %err, "failed to clear invalid push token");
                    }
                }
                self.ack(&delivery.entry_id).await
            }
            Action::AckAndDeadLetter(reason) => {
                // `dead_letter` expects an `AssignmentEvent`; the notification
                // stream has no lifecycle event of its own, so the push
                // fields ride along under a renamed key to dodge the
                // `type`/`orderId`/`timestamp` keys `to_wire` overwrites.
                let mut carrier_fields = delivery.fields.clone();
                if let Some(push_type) = carrier_fields.remove("type") {
                    carrier_fields.insert("push_type".to_string(), push_type);
                }
                let carrier = dispatch_types::AssignmentEvent {
                    kind: dispatch_types::MissionLifecycleEvent::Failed,
                    order_id: Uuid::nil(),
                    timestamp: chrono::Utc::now(),
                    fields: carrier_fields,
                };
                self.event_log
                    .dead_letter(
                        NOTIFICATION_CONSUMER_GROUP,
                        NOTIFICATION_DLQ_STREAM,
                        &delivery.entry_id,
                        &carrier,
                        &reason,
                    )
                    .await
            }
            Action::LeavePending => {
                tracing::warn!(entry_id = %delivery.entry_id, "push delivery failed, leaving pending for retry");
                Ok(())
            }
        }
    }

    async fn ack(&self, entry_id: &str) -> DispatchResult<()> {
        self.event_log.ack(NOTIFICATION_CONSUMER_GROUP, &[entry_id.to_string()]).await
    }

    /// Step 5: evict consumers idle past the threshold with nothing
    /// pending. Flag-gated by the caller (spec.md §4.6 step 5).
    pub async fn reap_dead_consumers(&self) -> DispatchResult<Vec<String>> {
        let threshold = Duration::from_millis(self.settings.dead_consumer_idle_threshold_ms.max(0) as u64);
        let consumers = self.event_log.list_consumers(NOTIFICATION_CONSUMER_GROUP).await?;
        let mut reaped = Vec::new();
        for consumer in consumers {
            if consumer.idle >= threshold && consumer.pending == 0 {
                if let Err(err) = self.event_log.delete_consumer(NOTIFICATION_CONSUMER_GROUP, &consumer.name).await {
                    tracing::warn!(consumer = %consumer.name, error = %err, "failed to delete dead consumer");
                    continue;
                }
                reaped.push(consumer.name);
            }
        }
        Ok(reaped)
    }
}

/// `PushMessage` doesn't carry a typed driver id (it's an FCM-facing
/// payload), but the assignment/sync producers stash it in `data` so the
/// worker can clear the right driver's token on invalidation.
fn driver_id_hint(message: &PushMessage) -> Option<Uuid> {
    message
        .data
        .get("driverId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Helper for producers (assignment engine, availability synchronizer)
/// to build a properly-tagged push message for a driver.
pub fn driver_push_message(
    driver_id: Uuid,
    fcm_token: &str,
    notification_type: NotificationType,
    title: impl Into<String>,
    body: impl Into<String>,
    extra_data: HashMap<String, serde_json::Value>,
) -> PushMessage {
    let mut data = extra_data;
    data.insert("driverId".to_string(), serde_json::json!(driver_id.to_string()));
    PushMessage {
        fcm_token: fcm_token.to_string(),
        title: title.into(),
        body: body.into(),
        data,
        notification_type,
    }
}

#[derive(Debug, Clone)]
pub struct NoFcmToken;

impl std::fmt::Display for NoFcmToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "driver has no registered push token")
    }
}

/// Producers call this before publishing; a driver with no token never
/// reaches the stream at all — there's nothing for the worker to do with
/// it (S5: "subsequent ... status flips ... are immediately acked as
/// NO_FCM_TOKEN" is satisfied by never enqueuing them in the first
/// place).
pub fn require_push_token(push_token: Option<&str>) -> Result<&str, NoFcmToken> {
    push_token.filter(|t| !t.is_empty()).ok_or(NoFcmToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_acks() {
        assert_eq!(decide_action(&PushOutcome::Success, 1, 5), Action::Ack);
    }

    #[test]
    fn invalid_token_acks_and_clears() {
        assert_eq!(decide_action(&PushOutcome::InvalidToken, 1, 5), Action::AckAndClearToken);
    }

    #[test]
    fn permanent_failure_is_a_poison_pill() {
        assert_eq!(decide_action(&PushOutcome::PermanentFailure("bad payload".into()), 1, 5), Action::Ack);
    }

    #[test]
    fn recoverable_failure_stays_pending_below_threshold() {
        let action = decide_action(&PushOutcome::RecoverableFailure("timeout".into()), 2, 5);
        assert_eq!(action, Action::LeavePending);
    }

    #[test]
    fn recoverable_failure_dead_letters_at_threshold() {
        let action = decide_action(&PushOutcome::RecoverableFailure("timeout".into()), 5, 5);
        assert_eq!(action, Action::AckAndDeadLetter("timeout".into()));
    }

    #[test]
    fn driver_id_hint_round_trips_from_driver_push_message() {
        let driver_id = Uuid::new_v4();
        let msg = driver_push_message(
            driver_id,
            "tok",
            NotificationType::NewMissionOffer,
            "t",
            "b",
            HashMap::new(),
        );
        assert_eq!(driver_id_hint(&msg), Some(driver_id));
    }

    #[test]
    fn require_push_token_rejects_missing_or_empty() {
        assert!(require_push_token(None).is_err());
        assert!(require_push_token(Some("")).is_err());
        assert!(require_push_token(Some("tok")).is_ok());
    }

    #[tokio::test]
    async fn null_push_sink_always_succeeds() {
        let sink = NullPushSink;
        let outcome = sink.send("tok", "t", "b", &HashMap::new(), false).await;
        assert_eq!(outcome, PushOutcome::Success);
    }
}

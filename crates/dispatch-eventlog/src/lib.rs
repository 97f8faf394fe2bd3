//! Consumer-group wrapper over a single Redis stream, carrying
//! [`dispatch_types::AssignmentEvent`] wire records for the mission
//! lifecycle (spec.md §6). One `EventLog` per stream name; callers own
//! which stream (`assignment_events`, `notification_events`, ...) and
//! which consumer group they read as.

use std::collections::HashMap;
use std::time::Duration;

use deadpool_redis::Pool;
use dispatch_common::{DispatchError, DispatchResult};
use dispatch_types::AssignmentEvent;
use redis::streams::{StreamClaimOptions, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

/// A message read off the stream, paired with the entry id the consumer
/// must ack (or let expire into the pending-entries list for reclaiming).
#[derive(Debug, Clone)]
pub struct Delivery {
    pub entry_id: String,
    pub event: AssignmentEvent,
}

/// Like [`Delivery`] but for streams that don't carry an
/// [`AssignmentEvent`] (e.g. the notification stream's `PushMessage`
/// records) — the caller parses `fields` itself.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub entry_id: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PendingSummary {
    pub count: u64,
}

/// One pending-entries-list row: how long a message has sat unacked and
/// how many times it's been delivered, for the notification pipeline's
/// claim/dead-letter decision (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct PendingDetail {
    pub entry_id: String,
    pub idle: Duration,
    pub times_delivered: usize,
}

/// A row from `XINFO CONSUMERS`, for the dead-consumer reaper.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: u64,
    pub idle: Duration,
}

#[derive(Clone)]
pub struct EventLog {
    pool: Pool,
    stream: String,
}

impl EventLog {
    pub fn new(pool: Pool, stream: impl Into<String>) -> Self {
        Self { pool, stream: stream.into() }
    }

    /// Hands back the underlying connection pool so a caller can build a
    /// second `EventLog` over a different stream without a fresh
    /// `deadpool_redis::Config` (e.g. the assignment engine bridging a
    /// push notification onto the notification stream).
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Creates the consumer group at the tail of the stream if it doesn't
    /// already exist. `MKSTREAM` so a fresh deployment doesn't need a
    /// separate provisioning step.
    pub async fn ensure_group(&self, group: &str) -> DispatchResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let result: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(&self.stream, group, "$").await;
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(DispatchError::EventLog(err)),
        }
    }

    /// `XADD` with an auto-generated id. Returns the entry id the broker
    /// assigned.
    pub async fn publish(&self, event: &AssignmentEvent) -> DispatchResult<String> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let wire = event.to_wire();
        let pairs: Vec<(&str, &str)> = wire.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let entry_id: String = conn.xadd(&self.stream, "*", &pairs).await?;
        Ok(entry_id)
    }

    /// Reads up to `count` new messages (`>`) for this consumer, blocking
    /// for `block` if the stream is currently empty.
    pub async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> DispatchResult<Vec<Delivery>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[self.stream.as_str()], &[">"], &opts)
            .await?;
        Ok(deliveries_from_reply(reply))
    }

    /// Raw-field counterpart of [`Self::publish`], for streams whose
    /// payload isn't an [`AssignmentEvent`] (e.g. a `PushMessage`).
    pub async fn publish_fields(&self, fields: &HashMap<String, String>) -> DispatchResult<String> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let entry_id: String = conn.xadd(&self.stream, "*", &pairs).await?;
        Ok(entry_id)
    }

    /// Raw-field counterpart of [`Self::read_group`].
    pub async fn read_group_raw(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> DispatchResult<Vec<RawDelivery>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[self.stream.as_str()], &[">"], &opts)
            .await?;
        Ok(raw_deliveries_from_reply(reply))
    }

    /// Raw-field counterpart of [`Self::claim_stale`].
    pub async fn claim_stale_raw(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> DispatchResult<Vec<RawDelivery>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let opts = StreamClaimOptions::default();
        let reply: StreamReadReply = conn
            .xclaim_options(
                &self.stream,
                group,
                consumer,
                min_idle.as_millis() as usize,
                entry_ids,
                opts,
            )
            .await?;
        Ok(raw_deliveries_from_reply(reply))
    }

    /// Pending-entries-list rows with idle time and delivery count, for a
    /// claim loop that also needs to decide when to dead-letter
    /// (spec.md §4.6 step 4).
    pub async fn pending_details(&self, group: &str, count: usize) -> DispatchResult<Vec<PendingDetail>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let reply: redis::streams::StreamPendingCountReply =
            conn.xpending_count(&self.stream, group, "-", "+", count).await?;
        Ok(reply
            .ids
            .into_iter()
            .map(|id| PendingDetail {
                entry_id: id.id,
                idle: Duration::from_millis(id.time_since_delivery),
                times_delivered: id.times_delivered,
            })
            .collect())
    }

    /// `XINFO CONSUMERS`, for the dead-consumer reaper (spec.md §4.6 step
    /// 5). `redis` has no typed reply for this command, so the generic
    /// RESP array is parsed by hand.
    pub async fn list_consumers(&self, group: &str) -> DispatchResult<Vec<ConsumerInfo>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let reply: redis::Value = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(&self.stream)
            .arg(group)
            .query_async(&mut conn)
            .await?;
        Ok(parse_consumer_infos(reply))
    }

    /// `XGROUP DELCONSUMER`: evicts a dead consumer, returning its
    /// pending entries to the group's general pool for reclaiming.
    pub async fn delete_consumer(&self, group: &str, consumer: &str) -> DispatchResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let _: i64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(&self.stream)
            .arg(group)
            .arg(consumer)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Claims messages idle for at least `min_idle` from the group's
    /// pending-entries list, handing them to `consumer`. Used by reaper
    /// loops to recover work from consumers that died mid-processing.
    pub async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> DispatchResult<Vec<Delivery>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let opts = StreamClaimOptions::default();
        let reply: StreamReadReply = conn
            .xclaim_options(
                &self.stream,
                group,
                consumer,
                min_idle.as_millis() as usize,
                entry_ids,
                opts,
            )
            .await?;
        Ok(deliveries_from_reply(reply))
    }

    /// Lists entry ids that have been pending in the group for at least
    /// `min_idle`, for `claim_stale` to pick up. Bounded to `count`
    /// entries per sweep so a reaper never loads an unbounded backlog.
    pub async fn stale_entry_ids(
        &self,
        group: &str,
        min_idle: Duration,
        count: usize,
    ) -> DispatchResult<Vec<String>> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream, group, "-", "+", count)
            .await?;
        Ok(reply
            .ids
            .into_iter()
            .filter(|id| id.time_since_delivery >= min_idle.as_millis() as u64)
            .map(|id| id.id)
            .collect())
    }

    pub async fn pending_summary(&self, group: &str) -> DispatchResult<PendingSummary> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let reply: redis::streams::StreamPendingReply = conn.xpending(&self.stream, group).await?;
        Ok(PendingSummary { count: reply.count() as u64 })
    }

    pub async fn ack(&self, group: &str, entry_ids: &[String]) -> DispatchResult<()> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let _: i64 = conn.xack(&self.stream, group, entry_ids).await?;
        Ok(())
    }

    /// Moves a permanently-unprocessable message onto a dead-letter
    /// stream and acks it off the source group, so the pending-entries
    /// list doesn't grow without bound (spec.md §6 notification DLQ).
    pub async fn dead_letter(
        &self,
        group: &str,
        dlq_stream: &str,
        entry_id: &str,
        event: &AssignmentEvent,
        reason: &str,
    ) -> DispatchResult<()> {
        let mut conn = self.pool.get().await.map_err(pool_error)?;
        let mut wire: HashMap<String, String> = event.to_wire();
        wire.insert("dlq_reason".to_string(), reason.to_string());
        wire.insert("dlq_source_entry_id".to_string(), entry_id.to_string());
        let pairs: Vec<(&str, &str)> = wire.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let _: String = conn.xadd(dlq_stream, "*", &pairs).await?;
        drop(conn);
        self.ack(group, &[entry_id.to_string()]).await
    }
}

fn deliveries_from_reply(reply: StreamReadReply) -> Vec<Delivery> {
    let mut out = Vec::new();
    for raw in raw_deliveries_from_reply(reply) {
        if let Some(event) = AssignmentEvent::from_wire(&raw.fields) {
            out.push(Delivery { entry_id: raw.entry_id, event });
        } else {
            tracing::warn!(entry_id = %raw.entry_id, "dropping stream entry with unparseable event payload");
        }
    }
    out
}

fn raw_deliveries_from_reply(reply: StreamReadReply) -> Vec<RawDelivery> {
    let mut out = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            let mut fields = HashMap::new();
            for (field, value) in id.map {
                if let redis::Value::Data(bytes) = value {
                    if let Ok(s) = String::from_utf8(bytes) {
                        fields.insert(field, s);
                    }
                }
            }
            out.push(RawDelivery { entry_id: id.id, fields });
        }
    }
    out
}

fn parse_consumer_infos(value: redis::Value) -> Vec<ConsumerInfo> {
    let mut out = Vec::new();
    let redis::Value::Bulk(consumers) = value else { return out };
    for consumer in consumers {
        let redis::Value::Bulk(fields) = consumer else { continue };
        let mut name = None;
        let mut pending = 0u64;
        let mut idle_ms = 0u64;
        let mut iter = fields.into_iter();
        while let (Some(key), Some(val)) = (iter.next(), iter.next()) {
            let redis::Value::Data(key_bytes) = key else { continue };
            match String::from_utf8_lossy(&key_bytes).as_ref() {
                "name" => {
                    if let redis::Value::Data(bytes) = val {
                        name = Some(String::from_utf8_lossy(&bytes).to_string());
                    }
                }
                "pending" => {
                    if let redis::Value::Int(n) = val {
                        pending = n.max(0) as u64;
                    }
                }
                "idle" => {
                    if let redis::Value::Int(n) = val {
                        idle_ms = n.max(0) as u64;
                    }
                }
                _ => {}
            }
        }
        if let Some(name) = name {
            out.push(ConsumerInfo { name, pending, idle: Duration::from_millis(idle_ms) });
        }
    }
    out
}

fn pool_error(err: deadpool_redis::PoolError) -> DispatchError {
    DispatchError::UpstreamUnavailable(format!("redis pool: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_types::MissionLifecycleEvent;
    use uuid::Uuid;

    #[test]
    fn deliveries_from_reply_skips_unparseable_entries() {
        let reply = StreamReadReply { keys: vec![] };
        assert!(deliveries_from_reply(reply).is_empty());
    }

    #[test]
    fn assignment_event_round_trips_through_wire_pairs() {
        let event = AssignmentEvent::new(MissionLifecycleEvent::OfferAcceptedByDriver, Uuid::new_v4())
            .with_field("driverId", Uuid::new_v4());
        let wire = event.to_wire();
        let back = AssignmentEvent::from_wire(&wire).expect("round trip");
        assert_eq!(back.kind, event.kind);
    }

    #[test]
    fn parse_consumer_infos_reads_name_pending_idle() {
        let value = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            redis::Value::Data(b"name".to_vec()),
            redis::Value::Data(b"worker-1".to_vec()),
            redis::Value::Data(b"pending".to_vec()),
            redis::Value::Int(3),
            redis::Value::Data(b"idle".to_vec()),
            redis::Value::Int(120_000),
        ])]);
        let consumers = parse_consumer_infos(value);
        assert_eq!(consumers.len(), 1);
        assert_eq!(consumers[0].name, "worker-1");
        assert_eq!(consumers[0].pending, 3);
        assert_eq!(consumers[0].idle, Duration::from_millis(120_000));
    }

    #[test]
    fn parse_consumer_infos_empty_on_unexpected_shape() {
        assert!(parse_consumer_infos(redis::Value::Nil).is_empty());
    }
}

//! Redis Streams event log
//!
//! Production [`EventLog`] implementation. A [`ConnectionManager`]
//! serves reads, acknowledgements, and group maintenance; every publish
//! checks out a dedicated connection so the WATCH/MULTI/EXEC sequence
//! never interleaves with another caller on a shared pipe.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{AsyncCommands, Client};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{AccountEvent, EventKind, RecordedEvent};

use super::{group_name, EventLog, EventLogError, Publication, READ_BATCH};

/// Field under which the serialized event rides on a stream entry.
const EVENT_FIELD: &str = "event";

/// Event log client backed by Redis Streams.
pub struct RedisEventLog {
    client: Client,
    conn: ConnectionManager,
    read_interval: Duration,
    subscriptions: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl RedisEventLog {
    /// Connect to Redis. `read_interval` is the poll cadence used by
    /// [`EventLog::subscribe`].
    pub async fn connect(url: &str, read_interval: Duration) -> Result<Self, EventLogError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            conn,
            read_interval,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// Key in the KV namespace holding an account's current version.
    /// Written with no expiry; the log is treated as durable.
    fn version_key(id: &str) -> String {
        format!("version:{id}")
    }

    /// Decode one stream entry into a recorded event. Entries without a
    /// parseable `event` field yield `None`.
    fn decode(entry: &StreamId) -> Option<RecordedEvent> {
        let payload: String = entry.get(EVENT_FIELD)?;
        match serde_json::from_str::<AccountEvent>(&payload) {
            Ok(event) => Some(RecordedEvent {
                event,
                timestamp: entry.id.clone(),
            }),
            Err(err) => {
                tracing::warn!(entry = %entry.id, error = %err, "skipping undecodable stream entry");
                None
            }
        }
    }

    /// Create the consumer group if it does not exist yet, positioned
    /// to deliver new entries only.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), EventLogError> {
        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;

        match created {
            Ok(_) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn add_id(&self, namespace: &str, id: &str) -> Result<bool, EventLogError> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(namespace, id).await?;
        Ok(added == 1)
    }

    async fn publish(
        &self,
        stream: &str,
        event: &AccountEvent,
    ) -> Result<Option<Publication>, EventLogError> {
        let key = Self::version_key(&event.id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let _: () = redis::cmd("WATCH").arg(&key).query_async(&mut conn).await?;
        let current: Option<String> = conn.get(&key).await?;

        let log_version = match current {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| EventLogError::CorruptVersionKey {
                    id: event.id.clone(),
                    value: raw,
                })?,
            None if event.kind == EventKind::Create => 0,
            None => {
                let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                return Err(EventLogError::VersionKeyMissing(event.id.clone()));
            }
        };

        if log_version != event.version {
            // A concurrent publisher already advanced this aggregate.
            let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
            return Ok(None);
        }

        let mut appended = event.clone();
        appended.version = event.version + 1;
        let payload = serde_json::to_string(&appended)?;

        // EXEC returns nil when the watched key changed between the GET
        // above and the transaction, which surfaces here as `None`.
        let result: Option<(i64, String)> = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .xadd(stream, "*", &[(EVENT_FIELD, payload.as_str())])
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|(version, timestamp)| Publication { version, timestamp }))
    }

    async fn read_since(
        &self,
        stream: &str,
        id: &str,
        since: &str,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let start = if since.is_empty() || since == "0" {
            "-".to_string()
        } else {
            // Exclusive range start: only entries strictly after `since`.
            format!("({since}")
        };

        let mut conn = self.conn.clone();
        let reply: StreamRangeReply = conn.xrange(stream, start.as_str(), "+").await?;

        Ok(reply
            .ids
            .iter()
            .filter_map(Self::decode)
            .filter(|recorded| recorded.event.id == id)
            .collect())
    }

    async fn subscribe(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<mpsc::Receiver<Vec<RecordedEvent>>, EventLogError> {
        let group = group_name(stream);
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(&(stream.to_string(), group.clone())) {
            return Err(EventLogError::AlreadySubscribed {
                stream: stream.to_string(),
                group,
            });
        }

        self.ensure_group(stream, &group).await?;

        let (tx, rx) = mpsc::channel(16);
        let mut conn = self.conn.clone();
        let read_interval = self.read_interval;
        let stream_name = stream.to_string();
        let group_for_task = group.clone();
        let consumer = consumer.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(read_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let options = StreamReadOptions::default()
                    .group(&group_for_task, &consumer)
                    .count(READ_BATCH);
                let reply: Result<StreamReadReply, redis::RedisError> = conn
                    .xread_options(&[stream_name.as_str()], &[">"], &options)
                    .await;

                match reply {
                    Ok(reply) => {
                        let batch: Vec<RecordedEvent> = reply
                            .keys
                            .iter()
                            .flat_map(|key| key.ids.iter())
                            .filter_map(RedisEventLog::decode)
                            .collect();

                        if !batch.is_empty() && tx.send(batch).await.is_err() {
                            // Receiver dropped; the subscription is over.
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::error!(stream = %stream_name, error = %err, "group read failed");
                    }
                }
            }
        });

        subscriptions.insert((stream.to_string(), group), handle);
        Ok(rx)
    }

    async fn ack(&self, stream: &str, timestamp: &str) -> Result<i64, EventLogError> {
        let mut conn = self.conn.clone();
        let acknowledged: i64 = conn.xack(stream, &group_name(stream), &[timestamp]).await?;
        Ok(acknowledged)
    }

    async fn read_pending(
        &self,
        stream: &str,
        consumer: &str,
        max_elapsed: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let group = group_name(stream);
        let mut conn = self.conn.clone();

        let pending: Result<StreamPendingCountReply, redis::RedisError> = conn
            .xpending_count(stream, &group, "-", "+", READ_BATCH)
            .await;
        let pending = match pending {
            Ok(reply) => reply,
            // No group yet means nothing was ever delivered.
            Err(err) if err.code() == Some("NOGROUP") => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|entry| Duration::from_millis(entry.last_delivered_ms as u64) >= max_elapsed)
            .map(|entry| entry.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(
                stream,
                &group,
                consumer,
                max_elapsed.as_millis() as usize,
                &stale,
            )
            .await?;

        Ok(claimed.ids.iter().filter_map(Self::decode).collect())
    }

    async fn close(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
    }
}

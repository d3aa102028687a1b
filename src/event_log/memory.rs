//! In-memory event log
//!
//! A process-local [`EventLog`] with the same semantics as the Redis
//! implementation: versioned optimistic publish, a single consumer
//! group per stream with delivery cursors, pending entries, and claim
//! transfer. Backs the hermetic service/projector tests.
//!
//! Cloning shares the log's state but not its subscription registry, so
//! each clone can join the group as a distinct consumer, the way
//! separate processes share one Redis.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::{AccountEvent, EventKind, RecordedEvent};

use super::{group_name, EventLog, EventLogError, Publication, READ_BATCH};

#[derive(Default)]
struct State {
    registries: HashMap<String, HashSet<String>>,
    versions: HashMap<String, i64>,
    streams: HashMap<String, Vec<StoredEntry>>,
    /// Group state keyed by stream name; the group name itself is
    /// always derived via [`group_name`].
    groups: HashMap<String, GroupState>,
    next_seq: u64,
}

struct StoredEntry {
    id: String,
    event: AccountEvent,
}

#[derive(Default)]
struct GroupState {
    /// Index of the next stream entry to deliver to the group.
    cursor: usize,
    pending: HashMap<String, PendingEntry>,
}

struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    event: AccountEvent,
}

/// Event log held entirely in process memory.
pub struct InMemoryEventLog {
    read_interval: Duration,
    state: Arc<Mutex<State>>,
    subscriptions: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl InMemoryEventLog {
    pub fn new(read_interval: Duration) -> Self {
        Self {
            read_interval,
            state: Arc::new(Mutex::new(State::default())),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn seq_of(timestamp: &str) -> u64 {
        timestamp
            .split('-')
            .next()
            .and_then(|seq| seq.parse().ok())
            .unwrap_or(0)
    }
}

impl Clone for InMemoryEventLog {
    fn clone(&self) -> Self {
        Self {
            read_interval: self.read_interval,
            state: Arc::clone(&self.state),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn add_id(&self, namespace: &str, id: &str) -> Result<bool, EventLogError> {
        let mut state = self.state.lock().await;
        Ok(state
            .registries
            .entry(namespace.to_string())
            .or_default()
            .insert(id.to_string()))
    }

    async fn publish(
        &self,
        stream: &str,
        event: &AccountEvent,
    ) -> Result<Option<Publication>, EventLogError> {
        let mut state = self.state.lock().await;

        let log_version = match state.versions.get(&event.id) {
            Some(version) => *version,
            None if event.kind == EventKind::Create => 0,
            None => return Err(EventLogError::VersionKeyMissing(event.id.clone())),
        };

        if log_version != event.version {
            return Ok(None);
        }

        let version = event.version + 1;
        state.versions.insert(event.id.clone(), version);

        state.next_seq += 1;
        let timestamp = format!("{}-0", state.next_seq);

        let mut appended = event.clone();
        appended.version = version;
        state
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(StoredEntry {
                id: timestamp.clone(),
                event: appended,
            });

        Ok(Some(Publication { version, timestamp }))
    }

    async fn read_since(
        &self,
        stream: &str,
        id: &str,
        since: &str,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let state = self.state.lock().await;
        let since_seq = Self::seq_of(since);

        Ok(state
            .streams
            .get(stream)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| Self::seq_of(&entry.id) > since_seq)
                    .filter(|entry| entry.event.id == id)
                    .map(|entry| RecordedEvent {
                        event: entry.event.clone(),
                        timestamp: entry.id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
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

        {
            // Lazy group creation, positioned at the stream tail so only
            // new entries are delivered.
            let mut state = self.state.lock().await;
            let tail = state.streams.get(stream).map(Vec::len).unwrap_or(0);
            state
                .groups
                .entry(stream.to_string())
                .or_insert_with(|| GroupState {
                    cursor: tail,
                    pending: HashMap::new(),
                });
        }

        let (tx, rx) = mpsc::channel(16);
        let shared = Arc::clone(&self.state);
        let read_interval = self.read_interval;
        let stream_name = stream.to_string();
        let consumer = consumer.to_string();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(read_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let batch = {
                    let mut state = shared.lock().await;
                    let entries_len = state.streams.get(&stream_name).map(Vec::len).unwrap_or(0);
                    let Some(group) = state.groups.get(&stream_name) else {
                        continue;
                    };
                    let from = group.cursor;
                    let to = entries_len.min(from + READ_BATCH);
                    if from >= to {
                        continue;
                    }

                    let delivered: Vec<RecordedEvent> = state.streams[&stream_name][from..to]
                        .iter()
                        .map(|entry| RecordedEvent {
                            event: entry.event.clone(),
                            timestamp: entry.id.clone(),
                        })
                        .collect();

                    let now = Instant::now();
                    if let Some(group) = state.groups.get_mut(&stream_name) {
                        group.cursor = to;
                        for recorded in &delivered {
                            group.pending.insert(
                                recorded.timestamp.clone(),
                                PendingEntry {
                                    consumer: consumer.clone(),
                                    delivered_at: now,
                                    event: recorded.event.clone(),
                                },
                            );
                        }
                    }

                    delivered
                };

                if tx.send(batch).await.is_err() {
                    break;
                }
            }
        });

        subscriptions.insert((stream.to_string(), group), handle);
        Ok(rx)
    }

    async fn ack(&self, stream: &str, timestamp: &str) -> Result<i64, EventLogError> {
        let mut state = self.state.lock().await;
        let acknowledged = state
            .groups
            .get_mut(stream)
            .and_then(|group| group.pending.remove(timestamp))
            .is_some();
        Ok(i64::from(acknowledged))
    }

    async fn read_pending(
        &self,
        stream: &str,
        consumer: &str,
        max_elapsed: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let mut state = self.state.lock().await;
        let Some(group) = state.groups.get_mut(stream) else {
            return Ok(Vec::new());
        };

        let now = Instant::now();
        let mut claimed = Vec::new();
        for (timestamp, entry) in group.pending.iter_mut() {
            if now.duration_since(entry.delivered_at) >= max_elapsed {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                claimed.push(RecordedEvent {
                    event: entry.event.clone(),
                    timestamp: timestamp.clone(),
                });
            }
        }

        claimed.sort_by_key(|recorded| Self::seq_of(&recorded.timestamp));
        Ok(claimed)
    }

    async fn close(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "accountStream";

    fn log() -> InMemoryEventLog {
        InMemoryEventLog::new(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_add_id_reports_duplicates() {
        let log = log();
        assert!(log.add_id("accountId", "JohnDoe").await.unwrap());
        assert!(!log.add_id("accountId", "JohnDoe").await.unwrap());
        assert!(log.add_id("accountId", "JaneDoe").await.unwrap());
    }

    #[tokio::test]
    async fn test_publish_assigns_contiguous_versions() {
        let log = log();

        let first = log
            .publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.version, 1);

        let second = log
            .publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.version, 2);
        assert_ne!(first.timestamp, second.timestamp);
    }

    #[tokio::test]
    async fn test_publish_stale_version_returns_none() {
        let log = log();
        log.publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        log.publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 10))
            .await
            .unwrap()
            .unwrap();

        let lost = log
            .publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 10))
            .await
            .unwrap();
        assert!(lost.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_version_key_rejects_non_create() {
        let log = log();
        let result = log
            .publish(STREAM, &AccountEvent::deposit("JohnDoe", 0, 10))
            .await;
        assert!(matches!(result, Err(EventLogError::VersionKeyMissing(_))));
    }

    #[tokio::test]
    async fn test_read_since_filters_by_id_and_position() {
        let log = log();
        let created = log
            .publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        log.publish(STREAM, &AccountEvent::create("JaneDoe"))
            .await
            .unwrap()
            .unwrap();
        log.publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 100))
            .await
            .unwrap()
            .unwrap();

        let all = log.read_since(STREAM, "JohnDoe", "0").await.unwrap();
        assert_eq!(all.len(), 2);

        let tail = log
            .read_since(STREAM, "JohnDoe", &created.timestamp)
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event.amount, Some(100));
    }

    #[tokio::test]
    async fn test_subscribe_delivers_new_entries_only() {
        let log = log();
        log.publish(STREAM, &AccountEvent::create("Old"))
            .await
            .unwrap()
            .unwrap();

        let mut rx = log.subscribe(STREAM, "consumer-a").await.unwrap();
        log.publish(STREAM, &AccountEvent::create("New"))
            .await
            .unwrap()
            .unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].event.id, "New");

        log.close().await;
    }

    #[tokio::test]
    async fn test_second_subscription_rejected() {
        let log = log();
        let _rx = log.subscribe(STREAM, "consumer-a").await.unwrap();
        let again = log.subscribe(STREAM, "consumer-a").await;
        assert!(matches!(
            again,
            Err(EventLogError::AlreadySubscribed { .. })
        ));
        log.close().await;
    }

    #[tokio::test]
    async fn test_pending_claim_after_idle() {
        let log = log();
        let mut rx = log.subscribe(STREAM, "consumer-a").await.unwrap();
        log.publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();

        // Delivered to consumer-a but never acknowledged.
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        log.close().await;

        tokio::time::sleep(Duration::from_millis(60)).await;

        let claimed = log
            .read_pending(STREAM, "consumer-b", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event.id, "JohnDoe");

        // Freshly claimed entries are no longer idle.
        let again = log
            .read_pending(STREAM, "consumer-b", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(again.is_empty());

        // Acknowledging removes the entry for good.
        let acked = log.ack(STREAM, &claimed[0].timestamp).await.unwrap();
        assert_eq!(acked, 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        let empty = log
            .read_pending(STREAM, "consumer-b", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state_but_subscribe_independently() {
        let log = log();
        let other = log.clone();

        log.publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        let seen = other.read_since(STREAM, "JohnDoe", "0").await.unwrap();
        assert_eq!(seen.len(), 1);
    }
}

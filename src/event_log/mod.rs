//! Event log client
//!
//! Abstraction over the ordered append-only log so the write and read
//! sides see typed operations. The backing store must offer an ordered
//! stream per topic with server-assigned entry ids, watch/transaction
//! primitives over a key-value namespace, consumer groups with
//! per-entry idle metadata, and claim transfer between consumers.
//!
//! `RedisEventLog` is the production implementation on Redis Streams;
//! `InMemoryEventLog` backs hermetic tests.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{AccountEvent, RecordedEvent};

pub use self::memory::InMemoryEventLog;
pub use self::redis::RedisEventLog;

/// How many entries a single group read or pending scan may return.
pub const READ_BATCH: usize = 100;

/// Consumer group name for a stream.
pub fn group_name(stream: &str) -> String {
    format!("{stream}Group")
}

/// Outcome of a successful optimistic publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Aggregate version after the append
    pub version: i64,
    /// Log-assigned entry id of the appended event
    pub timestamp: String,
}

/// Errors that can occur against the event log
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// Backend failure
    #[error("event log backend error: {0}")]
    Backend(#[from] ::redis::RedisError),

    /// Event payload could not be encoded or decoded
    #[error("event payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A non-create publish found no version key for its account.
    /// The acceptance window is not widened: only the first create may
    /// publish against an absent key.
    #[error("version key missing for account {0}; refusing non-create publish")]
    VersionKeyMissing(String),

    /// The version key holds something other than an integer
    #[error("version key for account {id} holds a non-numeric value: {value}")]
    CorruptVersionKey { id: String, value: String },

    /// A second subscription was requested for the same stream and group
    #[error("already subscribed to stream {stream} under group {group}")]
    AlreadySubscribed { stream: String, group: String },
}

/// Typed operations against the ordered log.
///
/// Every call is asynchronous and may suspend; backend errors propagate
/// to the caller. `publish` distinguishes optimistic-concurrency loss
/// (`Ok(None)`) from hard failure (`Err`).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Insert `id` into the named registry set. Returns true iff it was
    /// newly added. Used for create-time uniqueness.
    async fn add_id(&self, namespace: &str, id: &str) -> Result<bool, EventLogError>;

    /// Append `event` under optimistic concurrency.
    ///
    /// Watches the account's version key, compares it against
    /// `event.version`, and atomically increments the key and appends
    /// the event (stamped with the new version). Returns `None` when a
    /// concurrent publisher won the race.
    async fn publish(
        &self,
        stream: &str,
        event: &AccountEvent,
    ) -> Result<Option<Publication>, EventLogError>;

    /// Read all entries strictly after `since`, decoded and filtered to
    /// the given account id. Used for rehydration.
    async fn read_since(
        &self,
        stream: &str,
        id: &str,
        since: &str,
    ) -> Result<Vec<RecordedEvent>, EventLogError>;

    /// Join the stream's consumer group as `consumer` and receive
    /// non-empty batches of newly delivered entries.
    ///
    /// The group is created lazily ("already exists" is ignored) and
    /// polled on the client's read interval. At most one subscription
    /// per (stream, group) is allowed per client; a second request
    /// fails with [`EventLogError::AlreadySubscribed`]. Poll errors are
    /// logged and do not tear down the subscription.
    async fn subscribe(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<mpsc::Receiver<Vec<RecordedEvent>>, EventLogError>;

    /// Acknowledge one delivered entry; returns the number acknowledged.
    async fn ack(&self, stream: &str, timestamp: &str) -> Result<i64, EventLogError>;

    /// Scan the group's pending list and claim every entry idle for at
    /// least `max_elapsed`, transferring ownership to `consumer`.
    /// Returns the claimed entries; an absent group (cold start) yields
    /// an empty list.
    async fn read_pending(
        &self,
        stream: &str,
        consumer: &str,
        max_elapsed: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError>;

    /// Stop all poll loops and release backend connections.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_name() {
        assert_eq!(group_name("accountStream"), "accountStreamGroup");
    }
}

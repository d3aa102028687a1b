//! Domain Events
//!
//! Event definitions for the account stream. Events are immutable facts;
//! the aggregate's state is the fold of its events in log order.
//!
//! On the wire an event is a single JSON object
//! `{"id","version","type"[,"amount"]}` stored under the `event` field of
//! one stream entry. The log assigns the entry id, which becomes the
//! event's `timestamp` once read back.

use serde::{Deserialize, Serialize};

/// The three kinds of account events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Deposit,
    Withdraw,
}

/// An account event as serialized onto the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    /// Account id this event applies to
    pub id: String,

    /// Aggregate version. On publish this carries the publisher's
    /// expected current version; on the log it holds the version
    /// *after* the event is applied.
    pub version: i64,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Positive amount for deposit/withdraw; absent for create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

impl AccountEvent {
    /// Event registering a new account. Always published at version 0.
    pub fn create(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            kind: EventKind::Create,
            amount: None,
        }
    }

    pub fn deposit(id: impl Into<String>, version: i64, amount: i64) -> Self {
        Self {
            id: id.into(),
            version,
            kind: EventKind::Deposit,
            amount: Some(amount),
        }
    }

    pub fn withdraw(id: impl Into<String>, version: i64, amount: i64) -> Self {
        Self {
            id: id.into(),
            version,
            kind: EventKind::Withdraw,
            amount: Some(amount),
        }
    }

    /// Signed effect of this event on an account balance.
    pub fn funds_delta(&self) -> i64 {
        match (self.kind, self.amount) {
            (EventKind::Deposit, Some(amount)) => amount,
            (EventKind::Withdraw, Some(amount)) => -amount,
            _ => 0,
        }
    }
}

/// An event read back from the log, paired with its log-assigned
/// ordering token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: AccountEvent,
    /// Stream entry id; totally ordered within a stream.
    pub timestamp: String,
}

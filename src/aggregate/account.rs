//! Account Aggregate
//!
//! The write-side domain object. State is derived by folding events in
//! log order; commands validate against that state and never touch the
//! log themselves.

use serde::{Deserialize, Serialize};

use crate::domain::{Amount, DomainError, EventKind, RecordedEvent};

/// Account aggregate.
///
/// `version` and `timestamp` always reflect the last event folded into
/// this instance. `funds` never goes below zero at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: String,
    version: i64,
    timestamp: String,
    funds: i64,
}

/// Point-in-time projection of an aggregate, returned by the write-side
/// fetch operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: String,
    pub version: i64,
    pub timestamp: String,
    pub funds: i64,
}

impl Account {
    /// A blank aggregate that has seen no events yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            timestamp: "0".to_string(),
            funds: 0,
        }
    }

    /// An aggregate positioned just after its creation event.
    pub fn created(id: impl Into<String>, version: i64, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version,
            timestamp: timestamp.into(),
            funds: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn funds(&self) -> i64 {
        self.funds
    }

    /// Increase funds. The amount is validated positive at construction.
    pub fn deposit(&mut self, amount: &Amount) {
        self.funds += amount.value();
    }

    /// Decrease funds.
    ///
    /// # Errors
    /// - `DomainError::InsufficientFunds` if the balance would go negative
    pub fn withdraw(&mut self, amount: &Amount) -> Result<(), DomainError> {
        if self.funds - amount.value() < 0 {
            return Err(DomainError::InsufficientFunds {
                funds: self.funds,
                requested: amount.value(),
            });
        }
        self.funds -= amount.value();
        Ok(())
    }

    /// Adopt the position assigned by a successful publish.
    pub fn advance(&mut self, version: i64, timestamp: impl Into<String>) {
        self.version = version;
        self.timestamp = timestamp.into();
    }

    /// Fold a sequence of recorded events into this aggregate.
    ///
    /// Events for other accounts and the event already reflected by
    /// `self.timestamp` are skipped, so folding is safe to repeat and
    /// cached instances advance only past their last-seen position.
    pub fn rehydrate(&mut self, events: &[RecordedEvent]) {
        for recorded in events {
            let event = &recorded.event;
            if event.id != self.id || recorded.timestamp == self.timestamp {
                continue;
            }
            self.version = event.version;
            self.timestamp = recorded.timestamp.clone();
            if let Some(amount) = event.amount {
                match event.kind {
                    EventKind::Deposit => self.funds += amount,
                    EventKind::Withdraw => self.funds -= amount,
                    EventKind::Create => {}
                }
            }
        }
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id.clone(),
            version: self.version,
            timestamp: self.timestamp.clone(),
            funds: self.funds,
        }
    }
}

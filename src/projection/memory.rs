//! In-memory view store
//!
//! Mirrors the Postgres store's conditional-update semantics for
//! hermetic tests: the funds delta lands only when the event's
//! timestamp is new to the record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::RecordedEvent;

use super::{AccountView, ViewError, ViewStore};

#[derive(Default)]
struct ViewRow {
    funds: i64,
    timestamps: Vec<String>,
}

/// View store held entirely in process memory.
#[derive(Default, Clone)]
pub struct InMemoryViewStore {
    rows: Arc<Mutex<HashMap<String, ViewRow>>>,
}

impl InMemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ViewStore for InMemoryViewStore {
    async fn apply(&self, recorded: &RecordedEvent) -> Result<(), ViewError> {
        let mut rows = self.rows.lock().await;
        let row = rows.entry(recorded.event.id.clone()).or_default();

        if row.timestamps.contains(&recorded.timestamp) {
            return Ok(());
        }
        row.timestamps.push(recorded.timestamp.clone());
        row.funds += recorded.event.funds_delta();
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<AccountView>, ViewError> {
        let rows = self.rows.lock().await;
        Ok(rows.get(id).map(|row| AccountView {
            account_id: id.to_string(),
            funds: row.funds,
            timestamps: row.timestamps.clone(),
        }))
    }
}

//! Projection module
//!
//! The read side of the pipeline: a view store holding one record per
//! account (cumulative funds plus the set of applied event timestamps)
//! and the projector that drains the event stream into it.

pub mod memory;
pub mod projector;
pub mod store;

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::RecordedEvent;

pub use memory::InMemoryViewStore;
pub use projector::{consumer_name, AccountProjector};
pub use store::PgViewStore;

/// Materialized view record for one account
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub account_id: String,
    pub funds: i64,
    /// Event timestamps already folded into `funds`
    pub timestamps: Vec<String>,
}

/// View store errors
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("view store database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Queryable materialized view of account balances.
///
/// `apply` must be idempotent: re-applying an event whose timestamp the
/// record already contains leaves the record unchanged, which is what
/// makes at-least-once delivery safe.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Fold one recorded event into the account's view record.
    async fn apply(&self, recorded: &RecordedEvent) -> Result<(), ViewError>;

    /// Fetch the view record for an account, if it has one.
    async fn fetch(&self, id: &str) -> Result<Option<AccountView>, ViewError>;
}

//! Postgres view store
//!
//! One row per account. Idempotency rides on `applied_timestamps`: the
//! balance update is conditioned on the event's timestamp not being in
//! the array, so re-delivered events are no-ops.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::RecordedEvent;

use super::{AccountView, ViewError, ViewStore};

/// View store backed by a Postgres table.
#[derive(Debug, Clone)]
pub struct PgViewStore {
    pool: PgPool,
}

impl PgViewStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the view table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), ViewError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_view (
                account_id TEXT PRIMARY KEY,
                funds BIGINT NOT NULL DEFAULT 0,
                applied_timestamps TEXT[] NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply the delta only if this timestamp has not been folded in
    /// yet. Returns the number of rows updated (0 or 1).
    async fn conditional_update(
        &self,
        account_id: &str,
        delta: i64,
        timestamp: &str,
    ) -> Result<u64, ViewError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE account_view
            SET
                funds = funds + $2,
                applied_timestamps = array_append(applied_timestamps, $3)
            WHERE account_id = $1 AND NOT ($3 = ANY (applied_timestamps))
            "#,
        )
        .bind(account_id)
        .bind(delta)
        .bind(timestamp)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}

#[async_trait]
impl ViewStore for PgViewStore {
    async fn apply(&self, recorded: &RecordedEvent) -> Result<(), ViewError> {
        let account_id = &recorded.event.id;
        let delta = recorded.event.funds_delta();
        let timestamp = &recorded.timestamp;

        if self.conditional_update(account_id, delta, timestamp).await? == 1 {
            return Ok(());
        }

        // Nothing updated: either the record does not exist yet or the
        // timestamp is already applied.
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM account_view WHERE account_id = $1)",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            return Ok(());
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO account_view (account_id, funds, applied_timestamps)
            VALUES ($1, $2, ARRAY[$3])
            "#,
        )
        .bind(account_id)
        .bind(delta)
        .bind(timestamp)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            // A concurrent upsert for the same new id won the insert;
            // the row exists now and the conditional update will apply
            // the delta or recognize the timestamp as already there.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                self.conditional_update(account_id, delta, timestamp).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Option<AccountView>, ViewError> {
        let row: Option<(String, i64, Vec<String>)> = sqlx::query_as(
            "SELECT account_id, funds, applied_timestamps FROM account_view WHERE account_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(account_id, funds, timestamps)| AccountView {
            account_id,
            funds,
            timestamps,
        }))
    }
}

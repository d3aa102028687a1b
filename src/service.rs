//! Account Service
//!
//! The write-side command handler. Loads (or rehydrates) an aggregate,
//! validates the command against it, appends the resulting event under
//! optimistic concurrency, and maintains a warm cache of aggregates.
//!
//! The cache only ever holds published state: commands mutate a loaded
//! copy, commit it on publish success, and discard it when the
//! optimistic race is lost, so a retry observes only the winning delta.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::aggregate::{Account, AccountSnapshot};
use crate::domain::{AccountEvent, Amount};
use crate::error::AppError;
use crate::event_log::EventLog;

/// Registry set holding every issued account id.
const ID_REGISTRY: &str = "accountId";

/// Result of a successful deposit or withdrawal
#[derive(Debug, Clone, Serialize)]
pub struct CommandReceipt {
    pub id: String,
    pub amount: i64,
}

/// Command handler over the event log, with a process-wide aggregate
/// cache. Safe to share across request handlers.
pub struct AccountService {
    log: Arc<dyn EventLog>,
    stream: String,
    cache: RwLock<HashMap<String, Account>>,
}

impl AccountService {
    pub fn new(log: Arc<dyn EventLog>, stream: impl Into<String>) -> Self {
        Self {
            log,
            stream: stream.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new account id and publish its creation event.
    ///
    /// # Errors
    /// - `AppError::Conflict` if the id was already issued, or if the
    ///   creation publish loses the optimistic race
    pub async fn create(&self, id: &str) -> Result<(), AppError> {
        if !self.log.add_id(ID_REGISTRY, id).await? {
            return Err(AppError::Conflict(format!("account id {id} already exists")));
        }

        match self.log.publish(&self.stream, &AccountEvent::create(id)).await? {
            Some(publication) => {
                let account = Account::created(id, publication.version, publication.timestamp);
                self.cache.write().await.insert(id.to_string(), account);
                tracing::info!(account = id, "account created");
                Ok(())
            }
            None => Err(AppError::Conflict(format!("account id {id} already exists"))),
        }
    }

    /// Deposit `amount` minor units into the account.
    pub async fn deposit(&self, id: &str, amount: i64) -> Result<CommandReceipt, AppError> {
        let amount = Amount::new(amount)?;
        let mut account = self.load(id).await?;
        account.deposit(&amount);

        let event = AccountEvent::deposit(account.id(), account.version(), amount.value());
        self.commit(account, event, amount).await
    }

    /// Withdraw `amount` minor units from the account.
    pub async fn withdraw(&self, id: &str, amount: i64) -> Result<CommandReceipt, AppError> {
        let amount = Amount::new(amount)?;
        let mut account = self.load(id).await?;
        account.withdraw(&amount)?;

        let event = AccountEvent::withdraw(account.id(), account.version(), amount.value());
        self.commit(account, event, amount).await
    }

    /// Project the current write-side state of an account.
    pub async fn fetch(&self, id: &str) -> Result<AccountSnapshot, AppError> {
        Ok(self.load(id).await?.snapshot())
    }

    /// Shut down the underlying event log client.
    pub async fn close(&self) {
        self.log.close().await;
    }

    /// Publish a mutated aggregate copy. On success the copy adopts the
    /// assigned position and replaces the cache entry; on optimistic
    /// loss the copy is discarded and the conflict surfaces to the edge.
    async fn commit(
        &self,
        mut account: Account,
        event: AccountEvent,
        amount: Amount,
    ) -> Result<CommandReceipt, AppError> {
        match self.log.publish(&self.stream, &event).await? {
            Some(publication) => {
                account.advance(publication.version, publication.timestamp);
                let receipt = CommandReceipt {
                    id: account.id().to_string(),
                    amount: amount.value(),
                };
                self.cache
                    .write()
                    .await
                    .insert(account.id().to_string(), account);
                Ok(receipt)
            }
            None => {
                tracing::debug!(account = %event.id, "publish lost the optimistic race");
                Err(AppError::VersionConflict)
            }
        }
    }

    /// Rehydration with cache: start from the cached instance if there
    /// is one, fold in every event strictly newer than its last-seen
    /// timestamp, and write the advanced state back. An uncached id
    /// with no events does not exist.
    async fn load(&self, id: &str) -> Result<Account, AppError> {
        let cached = self.cache.read().await.get(id).cloned();
        let was_cached = cached.is_some();
        let mut account = cached.unwrap_or_else(|| Account::new(id));

        let events = self
            .log
            .read_since(&self.stream, id, account.timestamp())
            .await?;

        if !was_cached && events.is_empty() {
            return Err(AppError::NotFound(id.to_string()));
        }

        account.rehydrate(&events);
        if was_cached {
            self.cache
                .write()
                .await
                .insert(id.to_string(), account.clone());
        }
        Ok(account)
    }
}

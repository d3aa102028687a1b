//! Account Projector
//!
//! Long-running consumer that drains the account stream through a
//! consumer group, folds events idempotently into the view store,
//! acknowledges them, and periodically reclaims entries abandoned by
//! dead consumers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::domain::RecordedEvent;
use crate::event_log::{EventLog, EventLogError};

use super::ViewStore;

/// Consumer name for this process, unique across projector instances
/// sharing the group.
pub fn consumer_name() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("accountProjector:{}_{}", host, std::process::id())
}

/// Projector instance. Construct, then [`connect`](Self::connect) to
/// start the delivery loop and the pending sweep.
///
/// Cloning is shallow: clones share the log, the view store, and the
/// spawned loops.
#[derive(Clone)]
pub struct AccountProjector {
    log: Arc<dyn EventLog>,
    views: Arc<dyn ViewStore>,
    stream: String,
    consumer: String,
    pending_interval: Duration,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AccountProjector {
    pub fn new(
        log: Arc<dyn EventLog>,
        views: Arc<dyn ViewStore>,
        stream: impl Into<String>,
        consumer: impl Into<String>,
        pending_interval: Duration,
    ) -> Self {
        Self {
            log,
            views,
            stream: stream.into(),
            consumer: consumer.into(),
            pending_interval,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Join the stream's consumer group and start projecting.
    ///
    /// Spawns two loops: one feeding live deliveries into the batch
    /// handler, and one sweeping the group's pending list on
    /// `pending_interval`. The sweep interval doubles as the idle
    /// threshold, so an entry whose handler died is reprocessed no
    /// later than one interval after delivery.
    pub async fn connect(&self) -> Result<(), EventLogError> {
        let mut deliveries = self.log.subscribe(&self.stream, &self.consumer).await?;
        tracing::info!(consumer = %self.consumer, stream = %self.stream, "projector connected");

        let delivery_loop = {
            let projector = self.clone();
            tokio::spawn(async move {
                while let Some(batch) = deliveries.recv().await {
                    projector.handle_batch(batch).await;
                }
            })
        };

        let sweep_loop = {
            let projector = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(projector.pending_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately; skip it so the
                // sweep always waits a full interval.
                ticker.tick().await;

                loop {
                    ticker.tick().await;
                    let reclaimed = projector
                        .log
                        .read_pending(
                            &projector.stream,
                            &projector.consumer,
                            projector.pending_interval,
                        )
                        .await;

                    match reclaimed {
                        Ok(reclaimed) if !reclaimed.is_empty() => {
                            tracing::info!(
                                count = reclaimed.len(),
                                consumer = %projector.consumer,
                                "reclaimed abandoned pending entries"
                            );
                            projector.handle_batch(reclaimed).await;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::error!(error = %err, "pending sweep failed");
                        }
                    }
                }
            })
        };

        let mut tasks = self.tasks.lock().await;
        tasks.push(delivery_loop);
        tasks.push(sweep_loop);
        Ok(())
    }

    /// Apply one delivered batch. Events are processed concurrently;
    /// each is acknowledged only after its view update succeeds. A
    /// single failure never aborts the rest of the batch, since the
    /// unacknowledged entry comes back through the pending sweep.
    pub async fn handle_batch(&self, batch: Vec<RecordedEvent>) {
        join_all(batch.into_iter().map(|recorded| self.apply_one(recorded))).await;
    }

    async fn apply_one(&self, recorded: RecordedEvent) {
        if let Err(err) = self.views.apply(&recorded).await {
            tracing::error!(
                account = %recorded.event.id,
                timestamp = %recorded.timestamp,
                error = %err,
                "view update failed; entry stays pending"
            );
            return;
        }

        if let Err(err) = self.log.ack(&self.stream, &recorded.timestamp).await {
            tracing::error!(
                timestamp = %recorded.timestamp,
                error = %err,
                "acknowledge failed; entry will be redelivered"
            );
        }
    }

    /// Stop both loops and close the log client.
    pub async fn close(&self) {
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        self.log.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountEvent;
    use crate::event_log::InMemoryEventLog;
    use crate::projection::InMemoryViewStore;

    const STREAM: &str = "accountStream";

    fn projector(
        log: InMemoryEventLog,
        views: InMemoryViewStore,
        consumer: &str,
        pending_interval: Duration,
    ) -> AccountProjector {
        AccountProjector::new(
            Arc::new(log),
            Arc::new(views),
            STREAM,
            consumer,
            pending_interval,
        )
    }

    #[tokio::test]
    async fn test_projects_and_acknowledges_live_deliveries() {
        let log = InMemoryEventLog::new(Duration::from_millis(5));
        let views = InMemoryViewStore::new();
        let projector = projector(
            log.clone(),
            views.clone(),
            "projector-a",
            Duration::from_secs(5),
        );
        projector.connect().await.unwrap();

        log.publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        log.publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 100))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let view = views.fetch("JohnDoe").await.unwrap().unwrap();
        assert_eq!(view.funds, 100);
        assert_eq!(view.timestamps.len(), 2);

        // Everything applied was acknowledged: nothing left to claim.
        let pending = log
            .read_pending(STREAM, "checker", Duration::ZERO)
            .await
            .unwrap();
        assert!(pending.is_empty());

        projector.close().await;
    }

    #[tokio::test]
    async fn test_redelivery_leaves_view_unchanged() {
        let log = InMemoryEventLog::new(Duration::from_millis(5));
        let views = InMemoryViewStore::new();
        let projector = projector(
            log.clone(),
            views.clone(),
            "projector-a",
            Duration::from_secs(5),
        );

        let deposit = RecordedEvent {
            event: AccountEvent::deposit("JohnDoe", 1, 100),
            timestamp: "1-0".to_string(),
        };

        projector.handle_batch(vec![deposit.clone()]).await;
        projector.handle_batch(vec![deposit]).await;

        let view = views.fetch("JohnDoe").await.unwrap().unwrap();
        assert_eq!(view.funds, 100);
        assert_eq!(view.timestamps.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_abandoned_entries_exactly_once() {
        let log = InMemoryEventLog::new(Duration::from_millis(5));

        // A consumer that receives a delivery and dies before acking.
        let dead = log.clone();
        let mut rx = dead.subscribe(STREAM, "dead-consumer").await.unwrap();
        log.publish(STREAM, &AccountEvent::create("JohnDoe"))
            .await
            .unwrap()
            .unwrap();
        log.publish(STREAM, &AccountEvent::deposit("JohnDoe", 1, 40))
            .await
            .unwrap()
            .unwrap();
        let delivered = rx.recv().await.unwrap();
        assert!(!delivered.is_empty());
        drop(rx);
        dead.close().await;

        let views = InMemoryViewStore::new();
        let projector = projector(
            log.clone(),
            views.clone(),
            "projector-b",
            Duration::from_millis(20),
        );
        projector.connect().await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        let view = views.fetch("JohnDoe").await.unwrap().unwrap();
        assert_eq!(view.funds, 40);
        assert_eq!(view.timestamps.len(), 2);

        let pending = log
            .read_pending(STREAM, "checker", Duration::ZERO)
            .await
            .unwrap();
        assert!(pending.is_empty());

        projector.close().await;
    }
}

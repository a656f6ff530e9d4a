//! RefundDriver processor.
//!
//! Polls due refund tasks on a fixed period and submits refund transactions
//! for lobbies that never filled. The match is re-read per task right before
//! submission: a join may have raced the deadline, in which case the task is
//! left alone for the reconciler to cancel.

use crate::entities::MatchStatus;
use crate::ledger::{GatewayError, RefundSender};
use crate::scheduler::RefundScheduler;
use crate::store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DRIVER_PERIOD: Duration = Duration::from_secs(5);
/// Applied after a loop-level failure (store unreachable and the like).
const FAILURE_PERIOD: Duration = Duration::from_secs(30);
const BATCH_SIZE: i64 = 20;

#[derive(Debug, Error)]
pub enum RefundError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Fixed-period driver executing due refund tasks.
pub struct RefundDriver {
    store: Arc<dyn Store>,
    scheduler: RefundScheduler,
    refund: Arc<dyn RefundSender>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RefundDriver {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: RefundScheduler,
        refund: Arc<dyn RefundSender>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            scheduler,
            refund,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("RefundDriver started");
        let mut period = DRIVER_PERIOD;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("RefundDriver received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(period) => {
                    match self.run_cycle().await {
                        Ok(()) => period = DRIVER_PERIOD,
                        Err(e) => {
                            error!(error = %e, "Refund cycle failed, backing off");
                            period = FAILURE_PERIOD;
                        }
                    }
                }
            }
        }

        info!("RefundDriver shutdown complete");
    }

    async fn run_cycle(&self) -> Result<(), StoreError> {
        let due = self.scheduler.due(BATCH_SIZE).await?;
        for task in due {
            // Per-task failures never abort the batch.
            if let Err(e) = self.execute_task(&task.match_id).await {
                warn!(match_id = %task.match_id, error = %e, "Refund task failed");
            }
        }
        Ok(())
    }

    /// Execute one due task against the current match state.
    pub(crate) async fn execute_task(&self, match_id: &str) -> Result<(), RefundError> {
        let record = self.store.get_match(match_id).await?;
        let status = match record {
            Some(record) => record.status,
            None => {
                warn!(match_id, "Due refund for unknown match, canceling task");
                self.scheduler.cancel(match_id).await?;
                return Ok(());
            }
        };

        if status.terminal() {
            debug!(match_id, ?status, "Match already settled, canceling refund task");
            self.scheduler.cancel(match_id).await?;
            return Ok(());
        }
        if status != MatchStatus::Open {
            // A fill transition may be racing; leave the task for the next
            // cycle, the reconciler will cancel it.
            debug!(match_id, ?status, "Match progressed past Open, skipping refund");
            return Ok(());
        }

        let signature = self.refund.send_refund(match_id).await?;
        self.scheduler.mark_executed(match_id, &signature).await?;
        info!(match_id, tx = %signature, "Refund submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MatchInsert;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    struct FakeRefundSender {
        sent: Mutex<Vec<String>>,
    }

    impl FakeRefundSender {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RefundSender for FakeRefundSender {
        async fn send_refund(&self, match_id: &str) -> Result<String, GatewayError> {
            self.sent.lock().unwrap().push(match_id.to_string());
            Ok(format!("refund-tx-{match_id}"))
        }
    }

    fn driver_with(
        store: Arc<MemoryStore>,
    ) -> (RefundDriver, Arc<FakeRefundSender>, RefundScheduler) {
        let sender = Arc::new(FakeRefundSender::new());
        let scheduler = RefundScheduler::new(store.clone());
        let (_tx, shutdown_rx) = watch::channel(false);
        let driver = RefundDriver::new(store, scheduler.clone(), sender.clone(), shutdown_rx);
        (driver, sender, scheduler)
    }

    async fn open_match(store: &MemoryStore, match_id: &str) {
        store
            .insert_match(MatchInsert {
                match_id: match_id.to_string(),
                creator_pubkey: "creator".to_string(),
                stake_lamports: 100,
                team_size: 1,
                deadline_ts: 0,
                create_tx: "tx-create".to_string(),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn refunds_stalled_open_match() {
        let store = Arc::new(MemoryStore::new());
        let (driver, sender, scheduler) = driver_with(store.clone());
        open_match(&store, "m1").await;
        scheduler.schedule("m1", 0).await.unwrap();

        driver.execute_task("m1").await.unwrap();

        assert_eq!(sender.sent(), vec!["m1"]);
        let record = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Refunded);
        let task = store.get_refund_task("m1").await.unwrap().unwrap();
        assert_eq!(task.executed_tx.as_deref(), Some("refund-tx-m1"));
    }

    #[tokio::test]
    async fn cancels_task_for_missing_match() {
        let store = Arc::new(MemoryStore::new());
        let (driver, sender, scheduler) = driver_with(store.clone());
        scheduler.schedule("ghost", 0).await.unwrap();

        driver.execute_task("ghost").await.unwrap();

        assert!(sender.sent().is_empty());
        let task = store.get_refund_task("ghost").await.unwrap().unwrap();
        assert!(task.canceled_at.is_some());
    }

    #[tokio::test]
    async fn cancels_task_for_settled_match() {
        let store = Arc::new(MemoryStore::new());
        let (driver, sender, scheduler) = driver_with(store.clone());
        open_match(&store, "m1").await;
        scheduler.schedule("m1", 0).await.unwrap();

        let mut record = store.get_match("m1").await.unwrap().unwrap();
        record.status = MatchStatus::Resolved;
        store.update_match(&record).await.unwrap();

        driver.execute_task("m1").await.unwrap();
        assert!(sender.sent().is_empty());
        let task = store.get_refund_task("m1").await.unwrap().unwrap();
        assert!(task.canceled_at.is_some());
    }

    #[tokio::test]
    async fn skips_without_canceling_when_join_races() {
        let store = Arc::new(MemoryStore::new());
        let (driver, sender, scheduler) = driver_with(store.clone());
        open_match(&store, "m1").await;
        scheduler.schedule("m1", 0).await.unwrap();

        let mut record = store.get_match("m1").await.unwrap().unwrap();
        record.status = MatchStatus::Pending;
        store.update_match(&record).await.unwrap();

        driver.execute_task("m1").await.unwrap();
        assert!(sender.sent().is_empty());
        let task = store.get_refund_task("m1").await.unwrap().unwrap();
        assert!(task.canceled_at.is_none());
        assert!(task.executed_tx.is_none());
    }
}

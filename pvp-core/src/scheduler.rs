//! Refund scheduling.
//!
//! Every new lobby gets one refund task with a deadline derived from its
//! team size. The task is canceled when the lobby fills; otherwise the
//! RefundDriver picks it up once due. Tasks live in the store so deadlines
//! survive restarts.

use crate::entities::{MatchStatus, RefundTask};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Store-backed refund deadline tracker, shared by the reconciler and the
/// RefundDriver.
#[derive(Clone)]
pub struct RefundScheduler {
    store: Arc<dyn Store>,
}

impl RefundScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Schedule a refund for a match. Replays are no-ops.
    pub async fn schedule(&self, match_id: &str, deadline_ts: i64) -> Result<(), StoreError> {
        self.store
            .insert_refund_task(match_id, deadline_ts, OffsetDateTime::now_utc())
            .await?;
        debug!(match_id, deadline_ts, "Refund scheduled");
        Ok(())
    }

    /// Cancel the pending refund, typically because the lobby filled.
    pub async fn cancel(&self, match_id: &str) -> Result<(), StoreError> {
        self.store
            .cancel_refund_task(match_id, OffsetDateTime::now_utc())
            .await?;
        debug!(match_id, "Refund canceled");
        Ok(())
    }

    /// Tasks whose deadline has elapsed, oldest first.
    pub async fn due(&self, batch_size: i64) -> Result<Vec<RefundTask>, StoreError> {
        self.store
            .due_refund_tasks(OffsetDateTime::now_utc().unix_timestamp(), batch_size)
            .await
    }

    /// Record that the refund transaction landed on the ledger.
    ///
    /// Marks the task executed and moves the match itself to `Refunded`,
    /// keeping the transaction signature. The status guard makes a replayed
    /// refund event harmless.
    pub async fn mark_executed(&self, match_id: &str, tx: &str) -> Result<(), StoreError> {
        self.store.mark_refund_executed(match_id, tx).await?;

        let Some(mut record) = self.store.get_match(match_id).await? else {
            warn!(match_id, "Refund executed for unknown match");
            return Ok(());
        };
        if !record.status.refundable() {
            debug!(match_id, status = ?record.status, "Ignoring refund for settled match");
            return Ok(());
        }
        record.status = MatchStatus::Refunded;
        record.payout_tx = Some(tx.to_string());
        record.resolved_at = Some(OffsetDateTime::now_utc());
        self.store.update_match(&record).await?;
        info!(match_id, tx, "Match refunded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MatchInsert;
    use crate::store::MemoryStore;

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
    async fn scheduled_task_becomes_due() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = RefundScheduler::new(store.clone());
        open_match(&store, "m1").await;

        let past = OffsetDateTime::now_utc().unix_timestamp() - 10;
        scheduler.schedule("m1", past).await.unwrap();
        let due = scheduler.due(20).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].match_id, "m1");
    }

    #[tokio::test]
    async fn canceled_task_is_not_due() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = RefundScheduler::new(store.clone());
        open_match(&store, "m1").await;

        let past = OffsetDateTime::now_utc().unix_timestamp() - 10;
        scheduler.schedule("m1", past).await.unwrap();
        scheduler.cancel("m1").await.unwrap();
        assert!(scheduler.due(20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_executed_refunds_open_match() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = RefundScheduler::new(store.clone());
        open_match(&store, "m1").await;
        scheduler.schedule("m1", 0).await.unwrap();

        scheduler.mark_executed("m1", "tx-refund").await.unwrap();

        let record = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Refunded);
        assert_eq!(record.payout_tx.as_deref(), Some("tx-refund"));
        assert!(scheduler.due(20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_executed_never_regresses_terminal_match() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = RefundScheduler::new(store.clone());
        open_match(&store, "m1").await;

        let mut record = store.get_match("m1").await.unwrap().unwrap();
        record.status = MatchStatus::Resolved;
        store.update_match(&record).await.unwrap();

        scheduler.mark_executed("m1", "tx-refund").await.unwrap();
        let record = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Resolved);
        assert!(record.payout_tx.is_none());
    }
}

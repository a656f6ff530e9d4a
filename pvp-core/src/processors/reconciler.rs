//! Reconciler processor.
//!
//! The Reconciler is responsible for:
//! - Consuming decoded log batches from the subscription client
//! - Deduplicating by transaction signature (best effort, bounded cache)
//! - Applying the match state machine: Open -> Pending -> InProgress, plus
//!   the refund path out of Open/Pending
//! - Maintaining participant seats and user last-seen markers
//! - Scheduling/canceling refund tasks and kicking off the fallback resolve
//! - Publishing a notification after every externally visible transition
//!
//! Every write is idempotent at the store layer, so replaying a signature
//! that slipped past the cache is harmless.

use crate::entities::{
    MatchInsert, MatchStatus, MatchView, ParticipantInsert, refund_deadline_offset_secs,
};
use crate::events::{LogBatch, LogBatchReceiver, MatchNotification, NotificationSink};
use crate::ledger::decoder::{
    DomainEvent, LobbyCreated, LobbyRefunded, LobbyResolved, PlayerJoined, decode_log_line,
};
use crate::processors::resolver::{Resolver, spawn_fallback_resolve};
use crate::scheduler::RefundScheduler;
use crate::store::{Store, StoreError};
use crate::game;
use crate::utils::SignatureCache;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Capacity of the processed-signature cache.
const SIGNATURE_CACHE_CAPACITY: usize = 1000;

/// Delay between the finalize observation and the client-side round start.
const GAME_LEAD_IN: time::Duration = time::Duration::seconds(3);

/// The event ingestion worker.
pub struct Reconciler {
    store: Arc<dyn Store>,
    scheduler: RefundScheduler,
    resolver: Arc<Resolver>,
    notifier: Arc<dyn NotificationSink>,
    seen: SignatureCache,
    resolve_inflight: Arc<Mutex<HashSet<String>>>,
    batch_rx: LogBatchReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: RefundScheduler,
        resolver: Arc<Resolver>,
        notifier: Arc<dyn NotificationSink>,
        batch_rx: LogBatchReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            scheduler,
            resolver,
            notifier,
            seen: SignatureCache::new(SIGNATURE_CACHE_CAPACITY),
            resolve_inflight: Arc::new(Mutex::new(HashSet::new())),
            batch_rx,
            shutdown_rx,
        }
    }

    /// Run the Reconciler.
    pub async fn run(mut self) {
        info!("Reconciler started");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Reconciler received shutdown signal");
                        break;
                    }
                }

                batch = self.batch_rx.recv() => {
                    match batch {
                        Some(batch) => self.process_batch(batch).await,
                        None => {
                            info!("Log batch channel closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Reconciler shutdown complete");
    }

    async fn process_batch(&mut self, batch: LogBatch) {
        if batch.failed() {
            debug!(signature = %batch.signature, "Skipping failed transaction");
            return;
        }
        if !self.seen.insert(&batch.signature) {
            debug!(signature = %batch.signature, "Skipping already-processed signature");
            return;
        }

        for line in &batch.logs {
            let Some(event) = decode_log_line(line) else {
                continue;
            };
            if let Err(e) = self.apply_event(event, &batch.signature).await {
                error!(
                    signature = %batch.signature,
                    slot = batch.slot,
                    error = %e,
                    "Failed to apply event"
                );
            }
        }
    }

    /// Apply one decoded event to the store.
    pub(crate) async fn apply_event(
        &self,
        event: DomainEvent,
        signature: &str,
    ) -> Result<(), StoreError> {
        match event {
            DomainEvent::Created(e) => self.handle_created(e, signature).await,
            DomainEvent::Joined(e) => self.handle_joined(e, signature).await,
            DomainEvent::Resolved(e) => self.handle_resolved(e, signature).await,
            DomainEvent::Refunded(e) => self.handle_refunded(e, signature).await,
        }
    }

    async fn handle_created(&self, event: LobbyCreated, signature: &str) -> Result<(), StoreError> {
        let created_at = time::OffsetDateTime::from_unix_timestamp(event.created_at)
            .unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        let deadline_ts = event.created_at + refund_deadline_offset_secs(event.team_size);

        let inserted = self
            .store
            .insert_match(MatchInsert {
                match_id: event.lobby.clone(),
                creator_pubkey: event.creator.clone(),
                stake_lamports: event.stake_lamports as i64,
                team_size: i16::from(event.team_size),
                deadline_ts,
                create_tx: signature.to_string(),
                created_at,
            })
            .await?;
        if !inserted {
            debug!(match_id = %event.lobby, "Match already known, ignoring replay");
            return Ok(());
        }

        self.store
            .insert_participant(ParticipantInsert {
                match_id: event.lobby.clone(),
                pubkey: event.creator.clone(),
                side: 0,
                position: 0,
            })
            .await?;
        self.store
            .touch_user(&event.creator, time::OffsetDateTime::now_utc())
            .await?;
        self.scheduler.schedule(&event.lobby, deadline_ts).await?;

        info!(
            match_id = %event.lobby,
            stake = event.stake_lamports,
            team_size = event.team_size,
            "Match created"
        );
        self.notify(&event.lobby, MatchNotification::Created).await?;
        Ok(())
    }

    async fn handle_joined(&self, event: PlayerJoined, signature: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.store.get_match(&event.lobby).await? else {
            warn!(match_id = %event.lobby, "Join observed for unknown match");
            return Ok(());
        };

        // Counts in the payload include the joiner.
        let side_count = if event.side == 0 {
            event.team1_count
        } else {
            event.team2_count
        };
        let inserted = self
            .store
            .insert_participant(ParticipantInsert {
                match_id: event.lobby.clone(),
                pubkey: event.player.clone(),
                side: i16::from(event.side),
                position: i16::from(side_count.saturating_sub(1)),
            })
            .await?;
        if !inserted {
            debug!(match_id = %event.lobby, player = %event.player, "Duplicate join, seat already taken");
        }
        self.store
            .touch_user(&event.player, time::OffsetDateTime::now_utc())
            .await?;

        let filled = event.is_full && record.status == MatchStatus::Open;
        if filled {
            record.randomness_account = Some(event.randomness_account.clone());
            record.status = MatchStatus::Pending;
            record.pending_at = Some(time::OffsetDateTime::now_utc());
            record.join_tx = Some(signature.to_string());
            self.store.update_match(&record).await?;
            self.scheduler.cancel(&event.lobby).await?;

            info!(
                match_id = %event.lobby,
                randomness_account = %event.randomness_account,
                "Lobby full, awaiting randomness"
            );
            spawn_fallback_resolve(
                self.resolver.clone(),
                self.store.clone(),
                self.resolve_inflight.clone(),
                event.lobby.clone(),
                self.shutdown_rx.clone(),
            );
        }

        if inserted || filled {
            self.notify(&event.lobby, MatchNotification::Joined).await?;
        }
        Ok(())
    }

    async fn handle_resolved(
        &self,
        event: LobbyResolved,
        signature: &str,
    ) -> Result<(), StoreError> {
        let Some(mut record) = self.store.get_match(&event.lobby).await? else {
            warn!(match_id = %event.lobby, "Resolve observed for unknown match");
            return Ok(());
        };
        if record.status != MatchStatus::Open && record.status != MatchStatus::Pending {
            debug!(match_id = %event.lobby, status = ?record.status, "Ignoring resolve replay");
            return Ok(());
        }

        let winner_side = i16::from(event.winner_side);
        let participants = self.store.list_participants(&event.lobby).await?;
        let scores = game::generate_target_scores(&participants, winner_side);
        self.store
            .set_participant_scores(&event.lobby, &scores)
            .await?;

        record.winner_side = Some(winner_side);
        record.status = MatchStatus::InProgress;
        record.game_start_time = Some(time::OffsetDateTime::now_utc() + GAME_LEAD_IN);
        record.resolve_tx = Some(signature.to_string());
        self.store.update_match(&record).await?;

        info!(
            match_id = %event.lobby,
            winner_side,
            randomness_value = event.randomness_value,
            "Match resolved, round starting"
        );
        self.notify(&event.lobby, MatchNotification::InProgress)
            .await?;
        Ok(())
    }

    async fn handle_refunded(
        &self,
        event: LobbyRefunded,
        signature: &str,
    ) -> Result<(), StoreError> {
        info!(
            match_id = %event.lobby,
            refunded_count = event.refunded_count,
            total_refunded = event.total_refunded,
            "Refund observed on ledger"
        );
        self.scheduler.mark_executed(&event.lobby, signature).await?;

        if let Some(record) = self.store.get_match(&event.lobby).await?
            && record.status == MatchStatus::Refunded
        {
            self.notify(&event.lobby, MatchNotification::Refunded)
                .await?;
        }
        Ok(())
    }

    async fn notify(
        &self,
        match_id: &str,
        wrap: fn(MatchView) -> MatchNotification,
    ) -> Result<(), StoreError> {
        let Some(record) = self.store.get_match(match_id).await? else {
            return Ok(());
        };
        let participants = self.store.list_participants(match_id).await?;
        self.notifier
            .publish(wrap(MatchView::build(&record, &participants)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::log_batch_channel;
    use crate::ledger::{GatewayError, RandomnessClient, ResolveSender};
    use crate::pool::RandomnessPool;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct RecordingSink {
        published: Mutex<Vec<MatchNotification>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                published: Mutex::new(Vec::new()),
            }
        }

        fn kinds(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|n| {
                    match n {
                        MatchNotification::Created(_) => "created",
                        MatchNotification::Joined(_) => "joined",
                        MatchNotification::InProgress(_) => "in_progress",
                        MatchNotification::Refunded(_) => "refunded",
                        MatchNotification::Finalized(_) => "finalized",
                    }
                    .to_string()
                })
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn publish(&self, notification: MatchNotification) {
            self.published.lock().unwrap().push(notification);
        }
    }

    struct InertGateway;

    #[async_trait]
    impl RandomnessClient for InertGateway {
        async fn create_account(&self) -> Result<String, GatewayError> {
            Ok("inert-account".to_string())
        }

        async fn commit(&self, _account: &str) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn is_ready(&self, _account: &str) -> Result<bool, GatewayError> {
            Ok(false)
        }
    }

    #[async_trait]
    impl ResolveSender for InertGateway {
        async fn send_resolve(
            &self,
            match_id: &str,
            _randomness_account: &str,
        ) -> Result<String, GatewayError> {
            Ok(format!("resolve-tx-{match_id}"))
        }
    }

    struct Harness {
        reconciler: Reconciler,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        _batch_tx: crate::events::LogBatchSender,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let gateway = Arc::new(InertGateway);
        let pool = Arc::new(RandomnessPool::new(store.clone(), gateway.clone(), 8));
        let resolver = Arc::new(Resolver::new(
            store.clone(),
            gateway.clone(),
            gateway,
            pool,
            10,
        ));
        let scheduler = RefundScheduler::new(store.clone());
        let (batch_tx, batch_rx) = log_batch_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = Reconciler::new(
            store.clone(),
            scheduler,
            resolver,
            sink.clone(),
            batch_rx,
            shutdown_rx,
        );
        Harness {
            reconciler,
            store,
            sink,
            _batch_tx: batch_tx,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn created(match_id: &str, team_size: u8) -> DomainEvent {
        DomainEvent::Created(LobbyCreated {
            lobby: match_id.to_string(),
            lobby_id: 1,
            creator: "creator".to_string(),
            stake_lamports: 100,
            team_size,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        })
    }

    fn joined(match_id: &str, player: &str, is_full: bool) -> DomainEvent {
        DomainEvent::Joined(PlayerJoined {
            lobby: match_id.to_string(),
            player: player.to_string(),
            side: 1,
            team1_count: 1,
            team2_count: 1,
            is_full,
            randomness_account: "rand-1".to_string(),
        })
    }

    fn resolved(match_id: &str, winner_side: u8) -> DomainEvent {
        DomainEvent::Resolved(LobbyResolved {
            lobby: match_id.to_string(),
            winner_side,
            randomness_value: 42,
            total_pot: 200,
            platform_fee: 0,
            payout_per_winner: 200,
        })
    }

    #[tokio::test]
    async fn created_replay_inserts_one_match() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(created("m1", 1), "tx-b")
            .await
            .unwrap();

        let record = h.store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Open);
        assert_eq!(record.create_tx, "tx-a");
        assert_eq!(h.store.list_participants("m1").await.unwrap().len(), 1);
        assert_eq!(h.sink.kinds(), vec!["created"]);
    }

    #[tokio::test]
    async fn created_schedules_refund_by_team_size() {
        let h = harness();
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();

        let task = h.store.get_refund_task("m1").await.unwrap().unwrap();
        assert!((task.deadline_ts - (now + 120)).abs() <= 1);
    }

    #[tokio::test]
    async fn joined_replay_inserts_one_participant() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(joined("m1", "p2", false), "tx-b")
            .await
            .unwrap();
        h.reconciler
            .apply_event(joined("m1", "p2", false), "tx-c")
            .await
            .unwrap();

        let participants = h.store.list_participants("m1").await.unwrap();
        assert_eq!(participants.len(), 2);
    }

    #[tokio::test]
    async fn full_join_moves_match_to_pending() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(joined("m1", "p2", true), "tx-b")
            .await
            .unwrap();

        let record = h.store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Pending);
        assert_eq!(record.randomness_account.as_deref(), Some("rand-1"));
        assert_eq!(record.join_tx.as_deref(), Some("tx-b"));
        let task = h.store.get_refund_task("m1").await.unwrap().unwrap();
        assert!(task.canceled_at.is_some());
        assert_eq!(h.sink.kinds(), vec!["created", "joined"]);
    }

    #[tokio::test]
    async fn resolved_starts_round_with_scores() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(joined("m1", "p2", true), "tx-b")
            .await
            .unwrap();
        h.reconciler
            .apply_event(resolved("m1", 1), "tx-c")
            .await
            .unwrap();

        let record = h.store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::InProgress);
        assert_eq!(record.winner_side, Some(1));
        assert_eq!(record.resolve_tx.as_deref(), Some("tx-c"));
        assert!(record.game_start_time.unwrap() > time::OffsetDateTime::now_utc());

        let participants = h.store.list_participants("m1").await.unwrap();
        assert!(participants.iter().all(|p| p.target_score.is_some()));
        assert_eq!(
            h.sink.kinds(),
            vec!["created", "joined", "in_progress"]
        );
    }

    #[tokio::test]
    async fn refunded_is_terminal_only_from_open_or_pending() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(joined("m1", "p2", true), "tx-b")
            .await
            .unwrap();
        h.reconciler
            .apply_event(resolved("m1", 1), "tx-c")
            .await
            .unwrap();

        // InProgress match can no longer be refunded.
        h.reconciler
            .apply_event(
                DomainEvent::Refunded(LobbyRefunded {
                    lobby: "m1".to_string(),
                    refunded_count: 2,
                    total_refunded: 200,
                }),
                "tx-d",
            )
            .await
            .unwrap();
        let record = h.store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::InProgress);
    }

    #[tokio::test]
    async fn refunded_settles_open_match() {
        let h = harness();
        h.reconciler
            .apply_event(created("m1", 1), "tx-a")
            .await
            .unwrap();
        h.reconciler
            .apply_event(
                DomainEvent::Refunded(LobbyRefunded {
                    lobby: "m1".to_string(),
                    refunded_count: 1,
                    total_refunded: 100,
                }),
                "tx-b",
            )
            .await
            .unwrap();

        let record = h.store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(record.status, MatchStatus::Refunded);
        assert_eq!(record.payout_tx.as_deref(), Some("tx-b"));
        assert_eq!(h.sink.kinds(), vec!["created", "refunded"]);
    }

    #[tokio::test]
    async fn failed_and_duplicate_batches_are_skipped() {
        let mut h = harness();
        let line = "Program log: Instruction: CreateLobby".to_string();

        h.reconciler
            .process_batch(LogBatch {
                signature: "sig-1".to_string(),
                slot: 1,
                logs: vec![line.clone()],
                err: Some(serde_json::json!({"InstructionError": [0, "Custom"]})),
            })
            .await;
        // Failed transaction must not consume the signature.
        assert!(h.reconciler.seen.is_empty());

        h.reconciler
            .process_batch(LogBatch {
                signature: "sig-1".to_string(),
                slot: 1,
                logs: vec![line.clone()],
                err: None,
            })
            .await;
        h.reconciler
            .process_batch(LogBatch {
                signature: "sig-1".to_string(),
                slot: 2,
                logs: vec![line],
                err: None,
            })
            .await;
        assert_eq!(h.reconciler.seen.len(), 1);
    }
}

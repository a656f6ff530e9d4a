//! Round finalize sweep.
//!
//! The round itself runs client-side against the generated target scores.
//! This sweep watches `InProgress` matches whose round window has elapsed,
//! marks them `Resolved`, stamps winners, applies win/loss/earnings deltas
//! to each participant's user record and fires the finalized notification.
//! This is the only place per-user statistics are mutated.

use crate::entities::{MatchRecord, MatchStatus, MatchView};
use crate::events::{MatchNotification, NotificationSink};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const SWEEP_PERIOD: Duration = Duration::from_secs(5);
const SWEEP_BATCH: i64 = 50;
/// Fixed client-side round length.
const ROUND_LENGTH: time::Duration = time::Duration::seconds(20);

/// Fixed-period sweep finalizing rounds that have run their course.
pub struct GameTimeoutSweeper {
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GameTimeoutSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationSink>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            notifier,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("GameTimeoutSweeper started");
        let mut ticker = tokio::time::interval(SWEEP_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("GameTimeoutSweeper received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Finalize sweep failed");
                    }
                }
            }
        }

        info!("GameTimeoutSweeper shutdown complete");
    }

    async fn run_cycle(&self) -> Result<(), StoreError> {
        let now = OffsetDateTime::now_utc();
        let in_progress = self
            .store
            .list_matches_by_status(MatchStatus::InProgress, SWEEP_BATCH)
            .await?;

        for record in in_progress {
            let Some(start) = record.game_start_time else {
                warn!(match_id = %record.match_id, "InProgress match without a start time");
                continue;
            };
            if start + ROUND_LENGTH > now {
                continue;
            }
            if let Err(e) = self.finalize(record).await {
                warn!(error = %e, "Failed to finalize match");
            }
        }
        Ok(())
    }

    /// Settle one finished round.
    pub(crate) async fn finalize(&self, mut record: MatchRecord) -> Result<(), StoreError> {
        let Some(winner_side) = record.winner_side else {
            warn!(match_id = %record.match_id, "InProgress match without a winner side");
            return Ok(());
        };

        record.status = MatchStatus::Resolved;
        record.resolved_at = Some(OffsetDateTime::now_utc());
        self.store.update_match(&record).await?;
        self.store
            .set_participant_winners(&record.match_id, winner_side)
            .await?;

        let participants = self.store.list_participants(&record.match_id).await?;
        let winner_count = participants
            .iter()
            .filter(|p| p.side == winner_side)
            .count() as i64;
        // Full pot split between the winning seats.
        let winner_earnings = if winner_count > 0 {
            record.stake_lamports * participants.len() as i64 / winner_count
        } else {
            0
        };

        for participant in &participants {
            let won = participant.side == winner_side;
            let earnings = if won { winner_earnings } else { 0 };
            self.store
                .apply_user_stats(&participant.pubkey, won, earnings)
                .await?;
        }

        info!(
            match_id = %record.match_id,
            winner_side,
            winner_count,
            winner_earnings,
            "Round finalized"
        );
        debug!(match_id = %record.match_id, participants = participants.len(), "Stats applied");

        let fresh = self.store.list_participants(&record.match_id).await?;
        self.notifier
            .publish(MatchNotification::Finalized(MatchView::build(
                &record, &fresh,
            )));
        Ok(())
    }
}

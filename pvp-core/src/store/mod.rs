//! Repository contract over the match/user/pool store.
//!
//! The engine treats persistence as a transactional relational service behind
//! one trait. Every write the reconciler and the drivers perform is designed
//! to be idempotent at this layer (conditional inserts, status-guarded
//! updates), so concurrent loops and event replays cannot corrupt state.

pub mod memory;
pub mod postgres;

use crate::entities::{
    MatchInsert, MatchParticipant, MatchRecord, MatchStatus, ParticipantInsert,
    RandomnessPoolAccount, RefundTask,
};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The repository contract consumed by the engine.
///
/// Implementations must make the conditional operations atomic with respect
/// to concurrent callers: `insert_match`/`insert_participant` report whether
/// the row was actually inserted, and `claim_available_account` is a
/// single-writer claim (at most one caller receives a given account).
#[async_trait]
pub trait Store: Send + Sync {
    // -- Matches --------------------------------------------------------

    /// Insert a match if none exists for this id. Returns false on replay.
    async fn insert_match(&self, insert: MatchInsert) -> Result<bool, StoreError>;

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError>;

    async fn list_matches_by_status(
        &self,
        status: MatchStatus,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Matches that are `Pending` with a randomness account assigned.
    async fn matches_awaiting_randomness(
        &self,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError>;

    /// Full-row update keyed by `match_id`.
    async fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError>;

    // -- Participants ---------------------------------------------------

    /// Insert a seat unless one exists for (match, pubkey). Returns false on
    /// replay.
    async fn insert_participant(&self, insert: ParticipantInsert) -> Result<bool, StoreError>;

    async fn list_participants(
        &self,
        match_id: &str,
    ) -> Result<Vec<MatchParticipant>, StoreError>;

    /// Persist generated target scores, keyed by participant pubkey.
    async fn set_participant_scores(
        &self,
        match_id: &str,
        scores: &[(String, i32)],
    ) -> Result<(), StoreError>;

    /// Stamp `is_winner` on every participant of a match.
    async fn set_participant_winners(
        &self,
        match_id: &str,
        winner_side: i16,
    ) -> Result<(), StoreError>;

    // -- Users ----------------------------------------------------------

    /// Upsert the user row and advance its last-seen marker.
    async fn touch_user(&self, pubkey: &str, seen_at: OffsetDateTime) -> Result<(), StoreError>;

    /// Apply one match outcome to a user's aggregate stats.
    async fn apply_user_stats(
        &self,
        pubkey: &str,
        won: bool,
        earnings_lamports: i64,
    ) -> Result<(), StoreError>;

    // -- Refund tasks ----------------------------------------------------

    /// Schedule a refund task; a second schedule for the same match is a
    /// no-op.
    async fn insert_refund_task(
        &self,
        match_id: &str,
        deadline_ts: i64,
        scheduled_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    async fn get_refund_task(&self, match_id: &str) -> Result<Option<RefundTask>, StoreError>;

    /// Mark the task canceled. No-op if already inert or absent.
    async fn cancel_refund_task(
        &self,
        match_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Tasks whose deadline has elapsed and which are neither canceled nor
    /// executed.
    async fn due_refund_tasks(
        &self,
        now_ts: i64,
        batch_size: i64,
    ) -> Result<Vec<RefundTask>, StoreError>;

    async fn mark_refund_executed(&self, match_id: &str, tx: &str) -> Result<(), StoreError>;

    // -- Randomness pool -------------------------------------------------

    /// Atomically claim the oldest `Available` account, moving it to
    /// `InUse`. Returns `None` when the pool is exhausted.
    async fn claim_available_account(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<RandomnessPoolAccount>, StoreError>;

    async fn insert_pool_account(
        &self,
        account_pubkey: &str,
        created_at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Move an account to `Cooldown` until the given (future) deadline.
    async fn set_account_cooldown(
        &self,
        account_pubkey: &str,
        until: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// `Cooldown -> Available` for every account whose deadline has elapsed.
    /// Returns the number of accounts released.
    async fn release_cooldown_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError>;

    async fn mark_account_invalid(&self, account_pubkey: &str) -> Result<(), StoreError>;

    /// Drop `Invalid` accounts from the pool. Returns the number removed.
    async fn delete_invalid_accounts(&self) -> Result<u64, StoreError>;

    async fn pool_account_count(&self) -> Result<i64, StoreError>;
}

//! Postgres-backed [`Store`] implementation.
//!
//! Idempotency lives in the SQL: conditional inserts use
//! `ON CONFLICT DO NOTHING`, status-guarded updates carry their guard in the
//! `WHERE` clause, and the pool claim uses `FOR UPDATE SKIP LOCKED` so that
//! concurrent processes cannot hand out the same account twice.

use super::{Store, StoreError};
use crate::entities::{
    MatchInsert, MatchParticipant, MatchRecord, MatchStatus, ParticipantInsert,
    RandomnessAccountStatus, RandomnessPoolAccount, RefundTask,
};
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

const MATCH_COLUMNS: &str = "match_id, creator_pubkey, stake_lamports, team_size, status, \
     deadline_ts, randomness_account, winner_side, game_start_time, create_tx, join_tx, \
     resolve_tx, payout_tx, created_at, pending_at, resolved_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_match(&self, insert: MatchInsert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO matches \
             (match_id, creator_pubkey, stake_lamports, team_size, status, deadline_ts, \
              create_tx, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (match_id) DO NOTHING",
        )
        .bind(&insert.match_id)
        .bind(&insert.creator_pubkey)
        .bind(insert.stake_lamports)
        .bind(insert.team_size)
        .bind(MatchStatus::Open)
        .bind(insert.deadline_ts)
        .bind(&insert.create_tx)
        .bind(insert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        let record = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE match_id = $1"
        ))
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_matches_by_status(
        &self,
        status: MatchStatus,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let records = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE status = $1 ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn matches_awaiting_randomness(
        &self,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let records = sqlx::query_as::<_, MatchRecord>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE status = $1 AND randomness_account IS NOT NULL \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(MatchStatus::Pending)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE matches SET \
             status = $2, randomness_account = $3, winner_side = $4, game_start_time = $5, \
             join_tx = $6, resolve_tx = $7, payout_tx = $8, pending_at = $9, resolved_at = $10 \
             WHERE match_id = $1",
        )
        .bind(&record.match_id)
        .bind(record.status)
        .bind(&record.randomness_account)
        .bind(record.winner_side)
        .bind(record.game_start_time)
        .bind(&record.join_tx)
        .bind(&record.resolve_tx)
        .bind(&record.payout_tx)
        .bind(record.pending_at)
        .bind(record.resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_participant(&self, insert: ParticipantInsert) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO match_participants (match_id, pubkey, side, position) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (match_id, pubkey) DO NOTHING",
        )
        .bind(&insert.match_id)
        .bind(&insert.pubkey)
        .bind(insert.side)
        .bind(insert.position)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_participants(
        &self,
        match_id: &str,
    ) -> Result<Vec<MatchParticipant>, StoreError> {
        let participants = sqlx::query_as::<_, MatchParticipant>(
            "SELECT match_id, pubkey, side, position, target_score, is_winner \
             FROM match_participants WHERE match_id = $1 ORDER BY side, position",
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(participants)
    }

    async fn set_participant_scores(
        &self,
        match_id: &str,
        scores: &[(String, i32)],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (pubkey, score) in scores {
            sqlx::query(
                "UPDATE match_participants SET target_score = $3 \
                 WHERE match_id = $1 AND pubkey = $2",
            )
            .bind(match_id)
            .bind(pubkey)
            .bind(score)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_participant_winners(
        &self,
        match_id: &str,
        winner_side: i16,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE match_participants SET is_winner = (side = $2) WHERE match_id = $1",
        )
        .bind(match_id)
        .bind(winner_side)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_user(&self, pubkey: &str, seen_at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (pubkey, first_seen, last_seen) VALUES ($1, $2, $2) \
             ON CONFLICT (pubkey) DO UPDATE SET last_seen = EXCLUDED.last_seen",
        )
        .bind(pubkey)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_user_stats(
        &self,
        pubkey: &str,
        won: bool,
        earnings_lamports: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users \
             (pubkey, wins, losses, matches_played, total_earnings_lamports, first_seen, last_seen) \
             VALUES ($1, $2, $3, 1, $4, $5, $5) \
             ON CONFLICT (pubkey) DO UPDATE SET \
             wins = users.wins + EXCLUDED.wins, \
             losses = users.losses + EXCLUDED.losses, \
             matches_played = users.matches_played + 1, \
             total_earnings_lamports = users.total_earnings_lamports + EXCLUDED.total_earnings_lamports",
        )
        .bind(pubkey)
        .bind(if won { 1i64 } else { 0 })
        .bind(if won { 0i64 } else { 1 })
        .bind(earnings_lamports)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_refund_task(
        &self,
        match_id: &str,
        deadline_ts: i64,
        scheduled_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refund_tasks (match_id, deadline_ts, scheduled_at) \
             VALUES ($1, $2, $3) ON CONFLICT (match_id) DO NOTHING",
        )
        .bind(match_id)
        .bind(deadline_ts)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_refund_task(&self, match_id: &str) -> Result<Option<RefundTask>, StoreError> {
        let task = sqlx::query_as::<_, RefundTask>(
            "SELECT match_id, deadline_ts, scheduled_at, canceled_at, executed_tx \
             FROM refund_tasks WHERE match_id = $1",
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn cancel_refund_task(
        &self,
        match_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE refund_tasks SET canceled_at = $2 \
             WHERE match_id = $1 AND canceled_at IS NULL AND executed_tx IS NULL",
        )
        .bind(match_id)
        .bind(canceled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_refund_tasks(
        &self,
        now_ts: i64,
        batch_size: i64,
    ) -> Result<Vec<RefundTask>, StoreError> {
        let tasks = sqlx::query_as::<_, RefundTask>(
            "SELECT match_id, deadline_ts, scheduled_at, canceled_at, executed_tx \
             FROM refund_tasks \
             WHERE deadline_ts <= $1 AND canceled_at IS NULL AND executed_tx IS NULL \
             ORDER BY deadline_ts ASC LIMIT $2",
        )
        .bind(now_ts)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn mark_refund_executed(&self, match_id: &str, tx: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE refund_tasks SET executed_tx = $2 WHERE match_id = $1")
            .bind(match_id)
            .bind(tx)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_available_account(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<RandomnessPoolAccount>, StoreError> {
        let account = sqlx::query_as::<_, RandomnessPoolAccount>(
            "UPDATE randomness_pool SET status = $1, last_used_at = $2 \
             WHERE account_pubkey = ( \
                 SELECT account_pubkey FROM randomness_pool \
                 WHERE status = $3 \
                 ORDER BY created_at ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1) \
             RETURNING account_pubkey, status, created_at, last_used_at, cooldown_until",
        )
        .bind(RandomnessAccountStatus::InUse)
        .bind(now)
        .bind(RandomnessAccountStatus::Available)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_pool_account(
        &self,
        account_pubkey: &str,
        created_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO randomness_pool (account_pubkey, status, created_at) \
             VALUES ($1, $2, $3) ON CONFLICT (account_pubkey) DO NOTHING",
        )
        .bind(account_pubkey)
        .bind(RandomnessAccountStatus::Available)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_account_cooldown(
        &self,
        account_pubkey: &str,
        until: OffsetDateTime,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE randomness_pool SET status = $2, cooldown_until = $3 \
             WHERE account_pubkey = $1",
        )
        .bind(account_pubkey)
        .bind(RandomnessAccountStatus::Cooldown)
        .bind(until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_cooldown_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE randomness_pool SET status = $1, cooldown_until = NULL \
             WHERE status = $2 AND cooldown_until <= $3",
        )
        .bind(RandomnessAccountStatus::Available)
        .bind(RandomnessAccountStatus::Cooldown)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_account_invalid(&self, account_pubkey: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE randomness_pool SET status = $2 WHERE account_pubkey = $1")
            .bind(account_pubkey)
            .bind(RandomnessAccountStatus::Invalid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_invalid_accounts(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM randomness_pool WHERE status = $1")
            .bind(RandomnessAccountStatus::Invalid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn pool_account_count(&self) -> Result<i64, StoreError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM randomness_pool")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

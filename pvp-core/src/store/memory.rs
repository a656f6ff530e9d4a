//! In-memory store used by unit tests and local experiments.
//!
//! A single mutex over the whole state makes every conditional operation
//! trivially atomic, which is exactly the contract the Postgres
//! implementation provides through conditional SQL.

use super::{Store, StoreError};
use crate::entities::{
    MatchInsert, MatchParticipant, MatchRecord, MatchStatus, ParticipantInsert,
    RandomnessAccountStatus, RandomnessPoolAccount, RefundTask,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;

#[derive(Default)]
struct Inner {
    matches: HashMap<String, MatchRecord>,
    participants: Vec<MatchParticipant>,
    users: HashMap<String, crate::entities::UserRecord>,
    refund_tasks: HashMap<String, RefundTask>,
    pool_accounts: Vec<RandomnessPoolAccount>,
}

/// Mutex-backed [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicking test; propagate the inner state
        // anyway so remaining assertions can run.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Test helper: read a user's aggregate stats.
    pub fn user(&self, pubkey: &str) -> Option<crate::entities::UserRecord> {
        self.lock().users.get(pubkey).cloned()
    }

    /// Test helper: read a pool account.
    pub fn pool_account(&self, account_pubkey: &str) -> Option<RandomnessPoolAccount> {
        self.lock()
            .pool_accounts
            .iter()
            .find(|a| a.account_pubkey == account_pubkey)
            .cloned()
    }

    /// Test helper: backdate an account's cooldown deadline.
    pub fn expire_cooldown(&self, account_pubkey: &str) {
        let mut inner = self.lock();
        if let Some(account) = inner
            .pool_accounts
            .iter_mut()
            .find(|a| a.account_pubkey == account_pubkey)
        {
            account.cooldown_until = Some(OffsetDateTime::now_utc() - time::Duration::minutes(1));
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_match(&self, insert: MatchInsert) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.matches.contains_key(&insert.match_id) {
            return Ok(false);
        }
        inner.matches.insert(
            insert.match_id.clone(),
            MatchRecord {
                match_id: insert.match_id,
                creator_pubkey: insert.creator_pubkey,
                stake_lamports: insert.stake_lamports,
                team_size: insert.team_size,
                status: MatchStatus::Open,
                deadline_ts: insert.deadline_ts,
                randomness_account: None,
                winner_side: None,
                game_start_time: None,
                create_tx: insert.create_tx,
                join_tx: None,
                resolve_tx: None,
                payout_tx: None,
                created_at: insert.created_at,
                pending_at: None,
                resolved_at: None,
            },
        );
        Ok(true)
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>, StoreError> {
        Ok(self.lock().matches.get(match_id).cloned())
    }

    async fn list_matches_by_status(
        &self,
        status: MatchStatus,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<MatchRecord> = inner
            .matches
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn matches_awaiting_randomness(
        &self,
        limit: i64,
    ) -> Result<Vec<MatchRecord>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<MatchRecord> = inner
            .matches
            .values()
            .filter(|m| m.status == MatchStatus::Pending && m.randomness_account.is_some())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn update_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        self.lock()
            .matches
            .insert(record.match_id.clone(), record.clone());
        Ok(())
    }

    async fn insert_participant(&self, insert: ParticipantInsert) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let exists = inner
            .participants
            .iter()
            .any(|p| p.match_id == insert.match_id && p.pubkey == insert.pubkey);
        if exists {
            return Ok(false);
        }
        inner.participants.push(MatchParticipant {
            match_id: insert.match_id,
            pubkey: insert.pubkey,
            side: insert.side,
            position: insert.position,
            target_score: None,
            is_winner: None,
        });
        Ok(true)
    }

    async fn list_participants(
        &self,
        match_id: &str,
    ) -> Result<Vec<MatchParticipant>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<MatchParticipant> = inner
            .participants
            .iter()
            .filter(|p| p.match_id == match_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.side, p.position));
        Ok(out)
    }

    async fn set_participant_scores(
        &self,
        match_id: &str,
        scores: &[(String, i32)],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for p in inner.participants.iter_mut() {
            if p.match_id != match_id {
                continue;
            }
            if let Some((_, score)) = scores.iter().find(|(pk, _)| *pk == p.pubkey) {
                p.target_score = Some(*score);
            }
        }
        Ok(())
    }

    async fn set_participant_winners(
        &self,
        match_id: &str,
        winner_side: i16,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for p in inner.participants.iter_mut() {
            if p.match_id == match_id {
                p.is_winner = Some(p.side == winner_side);
            }
        }
        Ok(())
    }

    async fn touch_user(&self, pubkey: &str, seen_at: OffsetDateTime) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .users
            .entry(pubkey.to_string())
            .and_modify(|u| u.last_seen = seen_at)
            .or_insert(crate::entities::UserRecord {
                pubkey: pubkey.to_string(),
                wins: 0,
                losses: 0,
                matches_played: 0,
                total_earnings_lamports: 0,
                first_seen: seen_at,
                last_seen: seen_at,
            });
        Ok(())
    }

    async fn apply_user_stats(
        &self,
        pubkey: &str,
        won: bool,
        earnings_lamports: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let now = OffsetDateTime::now_utc();
        let user = inner
            .users
            .entry(pubkey.to_string())
            .or_insert(crate::entities::UserRecord {
                pubkey: pubkey.to_string(),
                wins: 0,
                losses: 0,
                matches_played: 0,
                total_earnings_lamports: 0,
                first_seen: now,
                last_seen: now,
            });
        if won {
            user.wins += 1;
        } else {
            user.losses += 1;
        }
        user.matches_played += 1;
        user.total_earnings_lamports += earnings_lamports;
        Ok(())
    }

    async fn insert_refund_task(
        &self,
        match_id: &str,
        deadline_ts: i64,
        scheduled_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .refund_tasks
            .entry(match_id.to_string())
            .or_insert(RefundTask {
                match_id: match_id.to_string(),
                deadline_ts,
                scheduled_at,
                canceled_at: None,
                executed_tx: None,
            });
        Ok(())
    }

    async fn get_refund_task(&self, match_id: &str) -> Result<Option<RefundTask>, StoreError> {
        Ok(self.lock().refund_tasks.get(match_id).cloned())
    }

    async fn cancel_refund_task(
        &self,
        match_id: &str,
        canceled_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(task) = inner.refund_tasks.get_mut(match_id)
            && !task.is_inert()
        {
            task.canceled_at = Some(canceled_at);
        }
        Ok(())
    }

    async fn due_refund_tasks(
        &self,
        now_ts: i64,
        batch_size: i64,
    ) -> Result<Vec<RefundTask>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<RefundTask> = inner
            .refund_tasks
            .values()
            .filter(|t| t.deadline_ts <= now_ts && !t.is_inert())
            .cloned()
            .collect();
        out.sort_by_key(|t| t.deadline_ts);
        out.truncate(batch_size as usize);
        Ok(out)
    }

    async fn mark_refund_executed(&self, match_id: &str, tx: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(task) = inner.refund_tasks.get_mut(match_id) {
            task.executed_tx = Some(tx.to_string());
        }
        Ok(())
    }

    async fn claim_available_account(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<RandomnessPoolAccount>, StoreError> {
        let mut inner = self.lock();
        let candidate = inner
            .pool_accounts
            .iter_mut()
            .filter(|a| a.status == RandomnessAccountStatus::Available)
            .min_by_key(|a| a.created_at);
        match candidate {
            Some(account) => {
                account.status = RandomnessAccountStatus::InUse;
                account.last_used_at = Some(now);
                Ok(Some(account.clone()))
            }
            None => Ok(None),
        }
    }

    async fn insert_pool_account(
        &self,
        account_pubkey: &str,
        created_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner
            .pool_accounts
            .iter()
            .any(|a| a.account_pubkey == account_pubkey)
        {
            return Ok(());
        }
        inner.pool_accounts.push(RandomnessPoolAccount {
            account_pubkey: account_pubkey.to_string(),
            status: RandomnessAccountStatus::Available,
            created_at,
            last_used_at: None,
            cooldown_until: None,
        });
        Ok(())
    }

    async fn set_account_cooldown(
        &self,
        account_pubkey: &str,
        until: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(account) = inner
            .pool_accounts
            .iter_mut()
            .find(|a| a.account_pubkey == account_pubkey)
        {
            account.status = RandomnessAccountStatus::Cooldown;
            account.cooldown_until = Some(until);
        }
        Ok(())
    }

    async fn release_cooldown_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut released = 0u64;
        for account in inner.pool_accounts.iter_mut() {
            if account.status == RandomnessAccountStatus::Cooldown
                && account.cooldown_until.is_some_and(|until| until <= now)
            {
                account.status = RandomnessAccountStatus::Available;
                account.cooldown_until = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn mark_account_invalid(&self, account_pubkey: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(account) = inner
            .pool_accounts
            .iter_mut()
            .find(|a| a.account_pubkey == account_pubkey)
        {
            account.status = RandomnessAccountStatus::Invalid;
        }
        Ok(())
    }

    async fn delete_invalid_accounts(&self) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let before = inner.pool_accounts.len();
        inner
            .pool_accounts
            .retain(|a| a.status != RandomnessAccountStatus::Invalid);
        Ok((before - inner.pool_accounts.len()) as u64)
    }

    async fn pool_account_count(&self) -> Result<i64, StoreError> {
        Ok(self.lock().pool_accounts.len() as i64)
    }
}

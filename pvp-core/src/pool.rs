//! Randomness account pool.
//!
//! Randomness accounts are expensive to provision, so they are pooled and
//! reused across matches: `Available -> InUse -> Cooldown -> Available`,
//! with `Invalid` for accounts that fail validation. Claiming is a
//! single-writer operation at the store layer, so multiple process instances
//! can share one pool safely. Replenishment happens lazily on an exhausted
//! acquire rather than proactively.

use crate::entities::RandomnessPoolAccount;
use crate::ledger::{GatewayError, RandomnessClient};
use crate::store::{Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Default cooldown after an account's randomness has been consumed.
pub const DEFAULT_COOLDOWN_MINUTES: i64 = 10;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("randomness provisioning failed: {0}")]
    Provision(#[from] GatewayError),
}

/// Shared pool of externally-funded randomness accounts.
pub struct RandomnessPool {
    store: Arc<dyn Store>,
    randomness: Arc<dyn RandomnessClient>,
    max_size: i64,
}

impl RandomnessPool {
    pub fn new(store: Arc<dyn Store>, randomness: Arc<dyn RandomnessClient>, max_size: i64) -> Self {
        Self {
            store,
            randomness,
            max_size,
        }
    }

    /// Claim an account for a match.
    ///
    /// Takes the oldest `Available` account; when the pool is exhausted and
    /// under its size cap, provisions a fresh one first. Returns `None` when
    /// the pool is both empty and at capacity.
    pub async fn acquire(&self) -> Result<Option<RandomnessPoolAccount>, PoolError> {
        let now = OffsetDateTime::now_utc();
        if let Some(account) = self.store.claim_available_account(now).await? {
            debug!(account = %account.account_pubkey, "Claimed pooled randomness account");
            return Ok(Some(account));
        }

        if self.store.pool_account_count().await? >= self.max_size {
            warn!("Randomness pool exhausted and at capacity");
            return Ok(None);
        }

        let account_pubkey = self.randomness.create_account().await?;
        info!(account = %account_pubkey, "Provisioned new randomness account");
        self.store
            .insert_pool_account(&account_pubkey, OffsetDateTime::now_utc())
            .await?;
        // Another instance may claim the fresh account first; any available
        // account is as good as the one we just created.
        Ok(self
            .store
            .claim_available_account(OffsetDateTime::now_utc())
            .await?)
    }

    /// Return a consumed account to the pool with a cooldown.
    pub async fn release(
        &self,
        account_pubkey: &str,
        cooldown_minutes: i64,
    ) -> Result<(), PoolError> {
        let until = OffsetDateTime::now_utc() + time::Duration::minutes(cooldown_minutes.max(1));
        self.store.set_account_cooldown(account_pubkey, until).await?;
        debug!(account = account_pubkey, "Released randomness account into cooldown");
        Ok(())
    }

    /// Exclude a misbehaving account from allocation.
    pub async fn mark_invalid(&self, account_pubkey: &str) -> Result<(), PoolError> {
        warn!(account = account_pubkey, "Marking randomness account invalid");
        self.store.mark_account_invalid(account_pubkey).await?;
        Ok(())
    }

    /// Provision accounts until the pool holds at least `target_size`.
    ///
    /// Run once at startup. Provisioning failures abort the fill; whatever
    /// was created stays in the pool.
    pub async fn initialize(&self, target_size: i64) -> Result<(), PoolError> {
        let existing = self.store.pool_account_count().await?;
        if existing >= target_size {
            debug!(existing, target_size, "Randomness pool already at target");
            return Ok(());
        }
        let missing = (target_size - existing).min(self.max_size - existing);
        info!(existing, missing, "Filling randomness pool");
        for _ in 0..missing {
            let account_pubkey = self.randomness.create_account().await?;
            self.store
                .insert_pool_account(&account_pubkey, OffsetDateTime::now_utc())
                .await?;
        }
        Ok(())
    }

    /// `Cooldown -> Available` for accounts whose deadline has elapsed.
    pub async fn sweep_cooldown_expired(&self) -> Result<u64, PoolError> {
        let released = self
            .store
            .release_cooldown_expired(OffsetDateTime::now_utc())
            .await?;
        if released > 0 {
            info!(released, "Released randomness accounts from cooldown");
        }
        Ok(released)
    }

    /// Drop `Invalid` accounts from the pool.
    pub async fn sweep_invalid(&self) -> Result<u64, PoolError> {
        let removed = self.store.delete_invalid_accounts().await?;
        if removed > 0 {
            info!(removed, "Removed invalid randomness accounts");
        }
        Ok(removed)
    }
}

//! Resolve path: randomness commit, readiness polling, finalize submission.
//!
//! Two callers share the [`Resolver`]: the independent [`ResolveDriver`]
//! polling on a fixed period, and the bounded fallback loop the reconciler
//! spawns the moment a lobby fills. Both perform the same
//! commit -> poll-ready -> finalize sequence; the ledger program rejects a
//! second finalize, so the race between them is harmless.

use crate::entities::{MatchRecord, MatchStatus};
use crate::ledger::{GatewayError, RandomnessClient, ResolveSender};
use crate::pool::{PoolError, RandomnessPool};
use crate::store::{Store, StoreError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Poll period of the independent driver.
const DRIVER_PERIOD: Duration = Duration::from_secs(5);
/// How many matches one driver cycle inspects.
const DRIVER_BATCH: i64 = 10;

/// Attempt ceiling of the fallback loop spawned on a full join.
const FALLBACK_MAX_ATTEMPTS: u32 = 10;
const FALLBACK_ATTEMPT_SPACING: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("match {0} has no randomness account")]
    MissingRandomness(String),
}

/// Result of one resolve attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Finalize transaction submitted; carries its signature.
    Submitted(String),
    /// Randomness not fulfilled yet; try again later.
    NotReady,
    /// The match left the awaiting-randomness state before we acted.
    AlreadySettled,
}

/// Shared resolve logic.
pub struct Resolver {
    store: Arc<dyn Store>,
    resolve: Arc<dyn ResolveSender>,
    randomness: Arc<dyn RandomnessClient>,
    pool: Arc<RandomnessPool>,
    /// Accounts committed during this process's lifetime. Commit is
    /// idempotent upstream, so this only saves redundant calls.
    committed: Mutex<HashSet<String>>,
    cooldown_minutes: i64,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn Store>,
        resolve: Arc<dyn ResolveSender>,
        randomness: Arc<dyn RandomnessClient>,
        pool: Arc<RandomnessPool>,
        cooldown_minutes: i64,
    ) -> Self {
        Self {
            store,
            resolve,
            randomness,
            pool,
            committed: Mutex::new(HashSet::new()),
            cooldown_minutes,
        }
    }

    fn committed_lock(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.committed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run one commit -> ready -> finalize attempt for a match.
    pub async fn try_resolve(&self, record: &MatchRecord) -> Result<ResolveOutcome, ResolveError> {
        if record.status != MatchStatus::Pending {
            return Ok(ResolveOutcome::AlreadySettled);
        }
        let account = record
            .randomness_account
            .as_deref()
            .ok_or_else(|| ResolveError::MissingRandomness(record.match_id.clone()))?;

        if !self.committed_lock().contains(account) {
            let accepted = self.randomness.commit(account).await?;
            if !accepted {
                debug!(match_id = %record.match_id, account, "Randomness commit not accepted");
            }
            self.committed_lock().insert(account.to_string());
        }

        if !self.randomness.is_ready(account).await? {
            return Ok(ResolveOutcome::NotReady);
        }

        let signature = self.resolve.send_resolve(&record.match_id, account).await?;
        info!(match_id = %record.match_id, tx = %signature, "Finalize transaction submitted");

        if let Err(e) = self.pool.release(account, self.cooldown_minutes).await {
            // The account stays InUse; the operator can recycle it manually.
            warn!(account, error = %e, "Failed to return randomness account to pool");
        }
        Ok(ResolveOutcome::Submitted(signature))
    }
}

/// Spawn the bounded fallback resolve loop for a freshly filled lobby.
///
/// The per-match in-flight set makes the spawn one-shot: a duplicate join
/// event cannot start a second loop while one is running. Returns false if
/// a loop was already in flight.
pub fn spawn_fallback_resolve(
    resolver: Arc<Resolver>,
    store: Arc<dyn Store>,
    inflight: Arc<Mutex<HashSet<String>>>,
    match_id: String,
    mut shutdown_rx: watch::Receiver<bool>,
) -> bool {
    {
        let mut guard = match inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !guard.insert(match_id.clone()) {
            debug!(match_id, "Fallback resolve already in flight");
            return false;
        }
    }

    tokio::spawn(async move {
        let mut attempts_exhausted = true;
        for attempt in 1..=FALLBACK_MAX_ATTEMPTS {
            if *shutdown_rx.borrow() {
                attempts_exhausted = false;
                break;
            }

            match store.get_match(&match_id).await {
                Ok(Some(record)) => match resolver.try_resolve(&record).await {
                    Ok(ResolveOutcome::Submitted(_)) | Ok(ResolveOutcome::AlreadySettled) => {
                        attempts_exhausted = false;
                        break;
                    }
                    Ok(ResolveOutcome::NotReady) => {
                        debug!(match_id, attempt, "Randomness not ready yet");
                    }
                    Err(e) => {
                        warn!(match_id, attempt, error = %e, "Fallback resolve attempt failed");
                    }
                },
                Ok(None) => {
                    warn!(match_id, "Match disappeared during fallback resolve");
                    attempts_exhausted = false;
                    break;
                }
                Err(e) => {
                    warn!(match_id, attempt, error = %e, "Failed to re-read match");
                }
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        attempts_exhausted = false;
                        break;
                    }
                }
                _ = tokio::time::sleep(FALLBACK_ATTEMPT_SPACING) => {}
            }
        }

        if attempts_exhausted {
            // The independent driver keeps polling; flag for an operator in
            // case the randomness provider is stuck for good.
            error!(
                match_id,
                attempts = FALLBACK_MAX_ATTEMPTS,
                "Fallback resolve exhausted, manual intervention may be required"
            );
        }

        let mut guard = match inflight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.remove(&match_id);
    });
    true
}

/// Fixed-period driver resolving matches that await randomness.
pub struct ResolveDriver {
    store: Arc<dyn Store>,
    resolver: Arc<Resolver>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ResolveDriver {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<Resolver>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            resolver,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("ResolveDriver started");
        let mut ticker = tokio::time::interval(DRIVER_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("ResolveDriver received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Resolve cycle failed");
                    }
                }
            }
        }

        info!("ResolveDriver shutdown complete");
    }

    async fn run_cycle(&self) -> Result<(), ResolveError> {
        let pending = self.store.matches_awaiting_randomness(DRIVER_BATCH).await?;
        for record in pending {
            // Per-match failures never abort the batch.
            match self.resolver.try_resolve(&record).await {
                Ok(ResolveOutcome::Submitted(_)) | Ok(ResolveOutcome::AlreadySettled) => {}
                Ok(ResolveOutcome::NotReady) => {
                    debug!(match_id = %record.match_id, "Randomness not ready");
                }
                Err(e) => {
                    warn!(match_id = %record.match_id, error = %e, "Resolve attempt failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MatchInsert;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use time::OffsetDateTime;

    struct FakeGateway {
        ready: AtomicBool,
        commits: AtomicUsize,
        resolves: AtomicUsize,
    }

    impl FakeGateway {
        fn new(ready: bool) -> Self {
            Self {
                ready: AtomicBool::new(ready),
                commits: AtomicUsize::new(0),
                resolves: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RandomnessClient for FakeGateway {
        async fn create_account(&self) -> Result<String, GatewayError> {
            Ok("fresh-account".to_string())
        }

        async fn commit(&self, _account: &str) -> Result<bool, GatewayError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn is_ready(&self, _account: &str) -> Result<bool, GatewayError> {
            Ok(self.ready.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl ResolveSender for FakeGateway {
        async fn send_resolve(
            &self,
            match_id: &str,
            _randomness_account: &str,
        ) -> Result<String, GatewayError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            Ok(format!("resolve-tx-{match_id}"))
        }
    }

    async fn pending_match(store: &MemoryStore, match_id: &str, account: &str) -> MatchRecord {
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
        let mut record = store.get_match(match_id).await.unwrap().unwrap();
        record.status = MatchStatus::Pending;
        record.randomness_account = Some(account.to_string());
        store.update_match(&record).await.unwrap();
        record
    }

    fn resolver_with(
        store: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
    ) -> (Arc<Resolver>, Arc<RandomnessPool>) {
        let pool = Arc::new(RandomnessPool::new(store.clone(), gateway.clone(), 8));
        let resolver = Arc::new(Resolver::new(
            store,
            gateway.clone(),
            gateway,
            pool.clone(),
            10,
        ));
        (resolver, pool)
    }

    #[tokio::test]
    async fn resolves_ready_match_and_releases_account() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(true));
        let (resolver, _pool) = resolver_with(store.clone(), gateway.clone());

        store
            .insert_pool_account("rand-1", OffsetDateTime::now_utc())
            .await
            .unwrap();
        let claimed = store
            .claim_available_account(OffsetDateTime::now_utc())
            .await
            .unwrap()
            .unwrap();
        let record = pending_match(&store, "m1", &claimed.account_pubkey).await;

        let outcome = resolver.try_resolve(&record).await.unwrap();
        assert_eq!(
            outcome,
            ResolveOutcome::Submitted("resolve-tx-m1".to_string())
        );
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 1);

        let account = store.pool_account("rand-1").unwrap();
        assert_eq!(
            account.status,
            crate::entities::RandomnessAccountStatus::Cooldown
        );
        assert!(account.cooldown_until.unwrap() > OffsetDateTime::now_utc());
    }

    #[tokio::test]
    async fn not_ready_defers_without_submitting() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(false));
        let (resolver, _pool) = resolver_with(store.clone(), gateway.clone());
        let record = pending_match(&store, "m1", "rand-1").await;

        assert_eq!(
            resolver.try_resolve(&record).await.unwrap(),
            ResolveOutcome::NotReady
        );
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn commits_once_per_account() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(false));
        let (resolver, _pool) = resolver_with(store.clone(), gateway.clone());
        let record = pending_match(&store, "m1", "rand-1").await;

        resolver.try_resolve(&record).await.unwrap();
        resolver.try_resolve(&record).await.unwrap();
        assert_eq!(gateway.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skips_match_no_longer_pending() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(true));
        let (resolver, _pool) = resolver_with(store.clone(), gateway.clone());
        let mut record = pending_match(&store, "m1", "rand-1").await;
        record.status = MatchStatus::InProgress;
        store.update_match(&record).await.unwrap();

        assert_eq!(
            resolver.try_resolve(&record).await.unwrap(),
            ResolveOutcome::AlreadySettled
        );
        assert_eq!(gateway.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fallback_spawn_is_one_shot_per_match() {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(FakeGateway::new(true));
        let (resolver, _pool) = resolver_with(store.clone(), gateway.clone());
        pending_match(&store, "m1", "rand-1").await;

        let inflight = Arc::new(Mutex::new(HashSet::new()));
        let (_tx, shutdown_rx) = watch::channel(false);

        let store_dyn: Arc<dyn Store> = store.clone();
        assert!(spawn_fallback_resolve(
            resolver.clone(),
            store_dyn.clone(),
            inflight.clone(),
            "m1".to_string(),
            shutdown_rx.clone(),
        ));
        assert!(!spawn_fallback_resolve(
            resolver,
            store_dyn,
            inflight,
            "m1".to_string(),
            shutdown_rx,
        ));
    }
}

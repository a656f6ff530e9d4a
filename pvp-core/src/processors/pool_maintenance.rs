//! Randomness pool maintenance loop.
//!
//! Fills the pool to its initial target at startup, then once per minute
//! releases accounts whose cooldown has elapsed and drops invalid ones.
//! Replenishment on exhaustion is handled lazily by the pool's acquire path,
//! not here.

use crate::pool::{PoolError, RandomnessPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const MAINTENANCE_PERIOD: Duration = Duration::from_secs(60);

pub struct PoolMaintenance {
    pool: Arc<RandomnessPool>,
    initial_size: i64,
    shutdown_rx: watch::Receiver<bool>,
}

impl PoolMaintenance {
    pub fn new(
        pool: Arc<RandomnessPool>,
        initial_size: i64,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            initial_size,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("PoolMaintenance started");

        // Startup fill is best effort; acquire provisions lazily if it
        // falls short.
        if let Err(e) = self.pool.initialize(self.initial_size).await {
            warn!(error = %e, "Initial randomness pool fill incomplete");
        }

        let mut ticker = tokio::time::interval(MAINTENANCE_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("PoolMaintenance received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "Pool maintenance cycle failed");
                    }
                }
            }
        }

        info!("PoolMaintenance shutdown complete");
    }

    async fn run_cycle(&self) -> Result<(), PoolError> {
        self.pool.sweep_cooldown_expired().await?;
        self.pool.sweep_invalid().await?;
        Ok(())
    }
}

//! TOML file configuration structures.
//!
//! These structs directly map to the `pvp-config.toml` file format.

use serde::{Deserialize, Serialize};

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub ledger: LedgerConfig,
    pub signer: SignerConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

/// Ledger subscription section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Websocket endpoint of the ledger RPC node.
    pub ws_url: String,
    /// Program id whose logs to follow.
    pub program_id: String,
    /// Commitment level for the subscription.
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

/// Signer service section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Base URL of the signer service holding the operator keypair.
    pub base_url: String,
    /// Per-request timeout, in seconds.
    #[serde(default = "default_signer_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_signer_timeout_secs() -> u64 {
    30
}

/// Randomness pool section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Accounts provisioned at startup.
    #[serde(default = "default_pool_initial_size")]
    pub initial_size: i64,
    /// Hard cap on pool size.
    #[serde(default = "default_pool_max_size")]
    pub max_size: i64,
    /// Cooldown applied after an account's randomness is consumed.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: default_pool_initial_size(),
            max_size: default_pool_max_size(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

fn default_pool_initial_size() -> i64 {
    5
}

fn default_pool_max_size() -> i64 {
    20
}

fn default_cooldown_minutes() -> i64 {
    10
}

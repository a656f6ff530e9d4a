use super::RandomnessAccountStatus;
use time::OffsetDateTime;

/// An externally funded randomness account, pooled for reuse across matches.
///
/// `InUse -> Cooldown` always carries a future `cooldown_until`;
/// `Cooldown -> Available` only after that deadline has elapsed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RandomnessPoolAccount {
    pub account_pubkey: String,
    pub status: RandomnessAccountStatus,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub cooldown_until: Option<OffsetDateTime>,
}

use time::OffsetDateTime;

/// Aggregate per-player statistics, keyed by wallet pubkey.
///
/// `first_seen`/`last_seen` are upserted whenever the player appears in a
/// ledger event; win/loss/earnings deltas are applied exactly once per match,
/// by the finalize sweep.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub pubkey: String,
    pub wins: i64,
    pub losses: i64,
    pub matches_played: i64,
    pub total_earnings_lamports: i64,
    pub first_seen: OffsetDateTime,
    pub last_seen: OffsetDateTime,
}

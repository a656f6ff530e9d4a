use super::MatchStatus;
use time::OffsetDateTime;

/// A match tracked from creation through payout or refund.
///
/// Identity is the lobby's ledger address (`match_id`). Rows are never
/// deleted; terminal statuses end the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MatchRecord {
    pub match_id: String,
    pub creator_pubkey: String,
    pub stake_lamports: i64,
    /// Players per side.
    pub team_size: i16,
    pub status: MatchStatus,
    /// Unix seconds after which an unfilled lobby becomes refundable.
    pub deadline_ts: i64,
    /// Set exactly once, on the Open -> Pending transition.
    pub randomness_account: Option<String>,
    pub winner_side: Option<i16>,
    /// When the round starts client-side; set on Resolved -> InProgress.
    pub game_start_time: Option<OffsetDateTime>,
    pub create_tx: String,
    pub join_tx: Option<String>,
    pub resolve_tx: Option<String>,
    pub payout_tx: Option<String>,
    pub created_at: OffsetDateTime,
    pub pending_at: Option<OffsetDateTime>,
    pub resolved_at: Option<OffsetDateTime>,
}

/// Data for inserting a newly observed match.
#[derive(Debug, Clone)]
pub struct MatchInsert {
    pub match_id: String,
    pub creator_pubkey: String,
    pub stake_lamports: i64,
    pub team_size: i16,
    pub deadline_ts: i64,
    pub create_tx: String,
    pub created_at: OffsetDateTime,
}

/// One player's seat in a match. Identity is (match_id, pubkey).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MatchParticipant {
    pub match_id: String,
    pub pubkey: String,
    pub side: i16,
    pub position: i16,
    /// Assigned by game data generation when the match resolves.
    pub target_score: Option<i32>,
    /// Stamped by the finalize sweep.
    pub is_winner: Option<bool>,
}

/// Data for inserting a participant seat.
#[derive(Debug, Clone)]
pub struct ParticipantInsert {
    pub match_id: String,
    pub pubkey: String,
    pub side: i16,
    pub position: i16,
}

/// Serializable snapshot pushed to the notification sink after every
/// externally-visible transition.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
    pub match_id: String,
    pub status: MatchStatus,
    pub stake_lamports: i64,
    pub team_size: i16,
    pub deadline_ts: i64,
    pub randomness_account: Option<String>,
    pub winner_side: Option<i16>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub game_start_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub pubkey: String,
    pub side: i16,
    pub position: i16,
    pub target_score: Option<i32>,
    pub is_winner: Option<bool>,
}

impl MatchView {
    pub fn build(record: &MatchRecord, participants: &[MatchParticipant]) -> Self {
        Self {
            match_id: record.match_id.clone(),
            status: record.status,
            stake_lamports: record.stake_lamports,
            team_size: record.team_size,
            deadline_ts: record.deadline_ts,
            randomness_account: record.randomness_account.clone(),
            winner_side: record.winner_side,
            game_start_time: record.game_start_time,
            created_at: record.created_at,
            resolved_at: record.resolved_at,
            participants: participants
                .iter()
                .map(|p| ParticipantView {
                    pubkey: p.pubkey.clone(),
                    side: p.side,
                    position: p.position,
                    target_score: p.target_score,
                    is_winner: p.is_winner,
                })
                .collect(),
        }
    }
}

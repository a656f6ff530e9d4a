pub mod match_record;
pub mod randomness_pool;
pub mod refund_task;
pub mod user;

pub use match_record::{
    MatchInsert, MatchParticipant, MatchRecord, MatchView, ParticipantInsert, ParticipantView,
};
pub use randomness_pool::RandomnessPoolAccount;
pub use refund_task::RefundTask;
pub use user::UserRecord;

/// Lifecycle status of a match.
///
/// Stored as SMALLINT. `Resolved` and `Refunded` are terminal; `Refunded` is
/// reachable only from `Open` or `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, sqlx::Type)]
#[repr(i16)]
pub enum MatchStatus {
    /// Lobby not yet full, waiting for players.
    Open = 0,
    /// Lobby full, randomness requested, waiting for fulfillment.
    Pending = 1,
    /// Randomness consumed, round running client-side.
    InProgress = 2,
    /// Round finished and settled.
    Resolved = 3,
    /// Stakes returned to participants.
    Refunded = 4,
}

impl MatchStatus {
    /// Whether a refund is still a legal transition from this status.
    pub fn refundable(self) -> bool {
        matches!(self, MatchStatus::Open | MatchStatus::Pending)
    }

    /// Whether the match has reached a terminal status.
    pub fn terminal(self) -> bool {
        matches!(self, MatchStatus::Resolved | MatchStatus::Refunded)
    }
}

/// Status of a randomness account in the pool.
///
/// Stored as SMALLINT. Exactly one consumer may hold an account `InUse`;
/// `Cooldown -> Available` only after the cooldown deadline has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, sqlx::Type)]
#[repr(i16)]
pub enum RandomnessAccountStatus {
    /// Ready to be allocated to a new lobby.
    Available = 0,
    /// Currently assigned to an active lobby.
    InUse = 1,
    /// Recently used, idling before reuse.
    Cooldown = 2,
    /// Failed validation, excluded from allocation.
    Invalid = 3,
}

/// Refund deadline offset, in seconds, for a lobby of the given per-side
/// team size. Small lobbies fill fast or not at all.
pub fn refund_deadline_offset_secs(team_size: u8) -> i64 {
    match team_size {
        1 => 120,
        2 => 300,
        _ => 600,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refundable_only_before_start() {
        assert!(MatchStatus::Open.refundable());
        assert!(MatchStatus::Pending.refundable());
        assert!(!MatchStatus::InProgress.refundable());
        assert!(!MatchStatus::Resolved.refundable());
        assert!(!MatchStatus::Refunded.refundable());
    }

    #[test]
    fn deadline_offsets_by_team_size() {
        assert_eq!(refund_deadline_offset_secs(1), 120);
        assert_eq!(refund_deadline_offset_secs(2), 300);
        assert_eq!(refund_deadline_offset_secs(5), 600);
    }
}

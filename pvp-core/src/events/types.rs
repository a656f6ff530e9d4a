use crate::entities::MatchView;

/// The raw log lines of one ledger transaction, as delivered by the
/// subscription.
///
/// No ordering is guaranteed across batches; within one batch the line order
/// is the program's emission order.
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub signature: String,
    pub slot: u64,
    pub logs: Vec<String>,
    /// Ledger-reported transaction error, if the transaction failed.
    pub err: Option<serde_json::Value>,
}

impl LogBatch {
    pub fn failed(&self) -> bool {
        self.err.is_some()
    }
}

/// A push notification describing a match after a state transition.
///
/// Carries the full view rather than an identifier so that transports can
/// forward it without a store round-trip.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", content = "match", rename_all = "camelCase")]
pub enum MatchNotification {
    Created(MatchView),
    Joined(MatchView),
    InProgress(MatchView),
    Refunded(MatchView),
    Finalized(MatchView),
}

impl MatchNotification {
    pub fn match_id(&self) -> &str {
        match self {
            MatchNotification::Created(v)
            | MatchNotification::Joined(v)
            | MatchNotification::InProgress(v)
            | MatchNotification::Refunded(v)
            | MatchNotification::Finalized(v) => &v.match_id,
        }
    }
}

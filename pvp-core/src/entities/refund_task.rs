use time::OffsetDateTime;

/// A scheduled refund for a lobby that may never fill.
///
/// One active task per match. A task with `canceled_at` or `executed_tx` set
/// is inert and excluded from the due-task query. The RefundDriver is the
/// only writer of `executed_tx`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefundTask {
    pub match_id: String,
    /// Unix seconds; the task is due once this has elapsed.
    pub deadline_ts: i64,
    pub scheduled_at: OffsetDateTime,
    pub canceled_at: Option<OffsetDateTime>,
    pub executed_tx: Option<String>,
}

impl RefundTask {
    pub fn is_inert(&self) -> bool {
        self.canceled_at.is_some() || self.executed_tx.is_some()
    }
}

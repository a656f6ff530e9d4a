use super::types::MatchNotification;
use tokio::sync::broadcast;
use tracing::debug;

/// Fire-and-forget notification sink.
///
/// Delivery failures must never block or fail the state mutation that
/// produced the notification, so `publish` is infallible from the caller's
/// point of view.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, notification: MatchNotification);
}

/// Broadcast-channel sink feeding real-time push transports.
///
/// Subscribers that fall behind lose the oldest notifications; that is
/// acceptable for UI pushes, which can always re-read current state.
pub struct BroadcastSink {
    tx: broadcast::Sender<MatchNotification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MatchNotification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn publish(&self, notification: MatchNotification) {
        // Err means no subscribers are currently listening.
        if self.tx.send(notification).is_err() {
            debug!("Match notification dropped, no subscribers");
        }
    }
}

//! Event types and channel infrastructure.
//!
//! The subscription client feeds [`LogBatch`]es into an mpsc channel consumed
//! by the reconciler; the reconciler publishes [`MatchNotification`]s through
//! the fire-and-forget [`NotificationSink`].

pub mod channels;
pub mod notify;
pub mod types;

pub use channels::{log_batch_channel, LogBatchReceiver, LogBatchSender, DEFAULT_CHANNEL_BUFFER};
pub use notify::{BroadcastSink, NotificationSink};
pub use types::{LogBatch, MatchNotification};

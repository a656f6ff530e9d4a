use super::types::LogBatch;
use tokio::sync::mpsc;

/// Default buffer size for the log batch channel.
///
/// Enough to absorb reconnect bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type LogBatchSender = mpsc::Sender<LogBatch>;
pub type LogBatchReceiver = mpsc::Receiver<LogBatch>;

/// Create the channel between the subscription client and the reconciler.
pub fn log_batch_channel() -> (LogBatchSender, LogBatchReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

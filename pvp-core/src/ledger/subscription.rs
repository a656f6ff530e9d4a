//! Durable log subscription client.
//!
//! Maintains one long-lived websocket subscription to the program's logs.
//! Any transport error sends the client into a reconnect loop with
//! exponential backoff (1s doubling to a 5 minute ceiling, reset on a
//! successful connect). Malformed inbound messages are dropped silently.
//! Shutdown is graceful: the receive loop observes the shutdown flag at
//! every suspension point, sends a close frame, and `run` only returns once
//! the loop has fully exited.

use crate::events::{LogBatch, LogBatchSender};
use crate::utils::Backoff;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters for the log subscription.
#[derive(Debug, Clone)]
pub struct LedgerLogClientConfig {
    /// Websocket endpoint of the ledger RPC node.
    pub ws_url: String,
    /// Program id whose logs to subscribe to.
    pub program_id: String,
    /// Commitment level for the subscription.
    pub commitment: String,
}

/// Log subscription client. Owns the connection lifecycle; decoded batches
/// are handed to the reconciler through an mpsc channel.
pub struct LedgerLogClient {
    config: LedgerLogClientConfig,
}

// -- Inbound notification envelope --------------------------------------

#[derive(Debug, Deserialize)]
struct WsInbound {
    method: Option<String>,
    params: Option<WsParams>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    result: WsResult,
}

#[derive(Debug, Deserialize)]
struct WsResult {
    context: WsContext,
    value: WsValue,
}

#[derive(Debug, Deserialize)]
struct WsContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct WsValue {
    signature: String,
    err: Option<serde_json::Value>,
    #[serde(default)]
    logs: Vec<String>,
}

impl LedgerLogClient {
    pub fn new(config: LedgerLogClientConfig) -> Self {
        Self { config }
    }

    /// Run the subscription until shutdown is signaled.
    ///
    /// Also returns when the batch channel closes, which means the
    /// reconciler is gone and there is nobody left to deliver to.
    pub async fn run(self, batch_tx: LogBatchSender, mut shutdown_rx: watch::Receiver<bool>) {
        info!(program_id = %self.config.program_id, "LedgerLogClient started");
        let mut backoff = Backoff::new(INITIAL_BACKOFF, MAX_BACKOFF);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match connect_async(&self.config.ws_url).await {
                Ok((stream, _)) => {
                    info!(url = %self.config.ws_url, "Ledger websocket connected");
                    backoff.reset();
                    match self
                        .subscribe_loop(stream, &batch_tx, &mut shutdown_rx)
                        .await
                    {
                        SessionEnd::Shutdown => break,
                        SessionEnd::ReceiverGone => {
                            info!("Log batch channel closed, stopping subscription");
                            break;
                        }
                        SessionEnd::Disconnected => {
                            warn!("Ledger websocket disconnected, reconnecting");
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Ledger websocket connect failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_secs = delay.as_secs(), "Backing off before reconnect");
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("LedgerLogClient shutdown complete");
    }

    /// Drive one connected session: send the subscribe request, then pump
    /// notifications into the channel until the transport drops, shutdown is
    /// signaled, or the receiver goes away.
    async fn subscribe_loop(
        &self,
        mut stream: WsStream,
        batch_tx: &LogBatchSender,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [self.config.program_id] },
                { "commitment": self.config.commitment },
            ],
        });

        if let Err(err) = stream.send(Message::text(request.to_string())).await {
            warn!(error = %err, "Failed to send subscribe request");
            return SessionEnd::Disconnected;
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        // Best-effort close; the server may already be gone.
                        let _ = stream.send(Message::Close(None)).await;
                        let _ = stream.close(None).await;
                        return SessionEnd::Shutdown;
                    }
                }

                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(batch) = parse_notification(&text)
                                && batch_tx.send(batch).await.is_err()
                            {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if stream.send(Message::Pong(payload)).await.is_err() {
                                return SessionEnd::Disconnected;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Disconnected;
                        }
                        Some(Ok(_)) => {
                            // Binary/pong frames are not part of the protocol
                            // we speak; ignore.
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Ledger websocket receive error");
                            return SessionEnd::Disconnected;
                        }
                    }
                }
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    ReceiverGone,
    Disconnected,
}

/// Parse one inbound websocket message into a [`LogBatch`].
///
/// Subscription confirmations, keep-alives and malformed payloads all yield
/// `None` and are dropped.
fn parse_notification(text: &str) -> Option<LogBatch> {
    let inbound: WsInbound = match serde_json::from_str(text) {
        Ok(inbound) => inbound,
        Err(err) => {
            debug!(error = %err, "Dropping unparseable websocket message");
            return None;
        }
    };
    if inbound.method.as_deref() != Some("logsNotification") {
        return None;
    }
    let result = inbound.params?.result;
    Some(LogBatch {
        signature: result.value.signature,
        slot: result.context.slot,
        logs: result.value.logs,
        err: result.value.err,
    })
}

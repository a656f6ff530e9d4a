//! Ledger-facing plumbing: the log subscription client, the log-to-domain
//! event decoder, and the transaction submission gateway.

pub mod decoder;
pub mod gateway;
pub mod subscription;

pub use decoder::{decode_log_line, DomainEvent};
pub use gateway::{GatewayError, HttpTxGateway, RandomnessClient, RefundSender, ResolveSender};
pub use subscription::{LedgerLogClient, LedgerLogClientConfig};

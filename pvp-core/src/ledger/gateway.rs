//! Transaction submission collaborators.
//!
//! Refunds, finalizes and randomness operations require the operator keypair,
//! which lives in a separate signer service. The drivers only see the traits;
//! [`HttpTxGateway`] is the production implementation calling the signer
//! service over HTTP with an explicit per-request timeout, so a stuck call
//! can never wedge a driver loop.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from the signer gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request error (includes timeouts)
    #[error("signer request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Signer refused the operation
    #[error("signer rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Submits a refund transaction for a stalled lobby.
#[async_trait]
pub trait RefundSender: Send + Sync {
    /// Returns the transaction signature.
    async fn send_refund(&self, match_id: &str) -> Result<String, GatewayError>;
}

/// Submits the finalize transaction that consumes fulfilled randomness.
#[async_trait]
pub trait ResolveSender: Send + Sync {
    /// Returns the transaction signature.
    async fn send_resolve(
        &self,
        match_id: &str,
        randomness_account: &str,
    ) -> Result<String, GatewayError>;
}

/// Operations on the external randomness provider.
#[async_trait]
pub trait RandomnessClient: Send + Sync {
    /// Provision and fund a fresh randomness account. Returns its address.
    async fn create_account(&self) -> Result<String, GatewayError>;

    /// Request randomness for the account. Idempotent upstream; returns
    /// whether the commit was accepted.
    async fn commit(&self, account: &str) -> Result<bool, GatewayError>;

    /// Whether the committed randomness has been fulfilled and is consumable.
    async fn is_ready(&self, account: &str) -> Result<bool, GatewayError>;
}

/// HTTP client for the signer service.
pub struct HttpTxGateway {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    committed: bool,
}

#[derive(Debug, Deserialize)]
struct ReadyResponse {
    ready: bool,
}

impl HttpTxGateway {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RefundSender for HttpTxGateway {
    async fn send_refund(&self, match_id: &str) -> Result<String, GatewayError> {
        debug!(match_id, "Submitting refund transaction");
        let response = self
            .client
            .post(format!("{}/refund", self.base_url))
            .json(&serde_json::json!({ "matchId": match_id }))
            .send()
            .await?;
        let body: SignatureResponse = Self::check(response).await?.json().await?;
        Ok(body.signature)
    }
}

#[async_trait]
impl ResolveSender for HttpTxGateway {
    async fn send_resolve(
        &self,
        match_id: &str,
        randomness_account: &str,
    ) -> Result<String, GatewayError> {
        debug!(match_id, randomness_account, "Submitting resolve transaction");
        let response = self
            .client
            .post(format!("{}/resolve", self.base_url))
            .json(&serde_json::json!({
                "matchId": match_id,
                "randomnessAccount": randomness_account,
            }))
            .send()
            .await?;
        let body: SignatureResponse = Self::check(response).await?.json().await?;
        Ok(body.signature)
    }
}

#[async_trait]
impl RandomnessClient for HttpTxGateway {
    async fn create_account(&self) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(format!("{}/randomness/create", self.base_url))
            .send()
            .await?;
        let body: AccountResponse = Self::check(response).await?.json().await?;
        Ok(body.account)
    }

    async fn commit(&self, account: &str) -> Result<bool, GatewayError> {
        let response = self
            .client
            .post(format!("{}/randomness/commit", self.base_url))
            .json(&serde_json::json!({ "account": account }))
            .send()
            .await?;
        let body: CommitResponse = Self::check(response).await?.json().await?;
        Ok(body.committed)
    }

    async fn is_ready(&self, account: &str) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(format!("{}/randomness/{}/ready", self.base_url, account))
            .send()
            .await?;
        let body: ReadyResponse = Self::check(response).await?.json().await?;
        Ok(body.ready)
    }
}

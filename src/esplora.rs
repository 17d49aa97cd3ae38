//! Esplora API Client
//!
//! The withdrawal flow's exit point: broadcasts signed transactions and
//! answers the height/confirmation queries the CLI reports with.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::withdrawal::service::{BroadcastError, TxBroadcaster};

/// Esplora API endpoints
pub const MAINNET_URL: &str = "https://blockstream.info/api";
pub const TESTNET_URL: &str = "https://blockstream.info/testnet/api";
pub const SIGNET_URL: &str = "https://blockstream.info/signet/api";

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    /// Create a new client with a custom URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn for_network(network: bitcoin::Network) -> Self {
        match network {
            bitcoin::Network::Bitcoin => Self::new(MAINNET_URL),
            bitcoin::Network::Signet => Self::new(SIGNET_URL),
            _ => Self::new(TESTNET_URL),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current chain tip height
    pub async fn tip_height(&self) -> Result<u64, EsploraError> {
        let url = format!("{}/blocks/tip/height", self.base_url);
        let body = self.client.get(&url).send().await?.text().await?;
        body.trim()
            .parse()
            .map_err(|_| EsploraError::Parse(format!("bad tip height: {body}")))
    }

    /// Confirmation status of a transaction
    pub async fn tx_status(&self, txid: &str) -> Result<TxStatus, EsploraError> {
        let url = format!("{}/tx/{}/status", self.base_url, txid);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EsploraError::TxNotFound(txid.to_string()));
        }
        Ok(resp.json().await?)
    }

    /// Number of confirmations a transaction has accumulated
    pub async fn confirmations(&self, txid: &str) -> Result<u32, EsploraError> {
        let status = self.tx_status(txid).await?;
        if !status.confirmed {
            return Ok(0);
        }
        let tip = self.tip_height().await?;
        let tx_height = status.block_height.unwrap_or(tip);
        Ok((tip.saturating_sub(tx_height) + 1) as u32)
    }

    /// Submit a raw transaction; returns the txid assigned by the network
    pub async fn broadcast_tx(&self, tx_hex: &str) -> Result<String, EsploraError> {
        let url = format!("{}/tx", self.base_url);
        let resp = self
            .client
            .post(&url)
            .body(tx_hex.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let reason = resp.text().await.unwrap_or_default();
            return Err(EsploraError::Rejected(reason));
        }

        Ok(resp.text().await?.trim().to_string())
    }
}

#[async_trait]
impl TxBroadcaster for EsploraClient {
    async fn broadcast(&self, tx_hex: &str) -> Result<String, BroadcastError> {
        self.broadcast_tx(tx_hex).await.map_err(|e| match e {
            EsploraError::Rejected(reason) => BroadcastError::Rejected(reason),
            other => BroadcastError::Transport(other.to_string()),
        })
    }
}

/// Transaction confirmation status
#[derive(Debug, Clone, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_hash: Option<String>,
    pub block_time: Option<u64>,
}

/// Esplora error types
#[derive(Debug, thiserror::Error)]
pub enum EsploraError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

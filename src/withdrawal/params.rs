//! Global Parameter Version Resolution
//!
//! Finds the protocol parameter version that was active at a given block
//! height. Withdrawals must replay the parameters in force when the stake
//! was created, never the version current now: deriving scripts from the
//! wrong version produces a transaction that cannot spend the real output.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;

use crate::types::GlobalParamsVersion;

/// Parameter resolution and retrieval errors
#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("no parameter version active at height {height}")]
    NoMatchingVersion { height: u64 },

    #[error("failed to fetch parameter versions: {0}")]
    Fetch(String),

    #[error("failed to decode parameter versions: {0}")]
    Decode(String),
}

/// Resolve the parameter version active at `height`.
///
/// A version is active from its activation height until the next version
/// activates. Versions may arrive in any order; resolution picks the
/// highest activation height not exceeding `height`. Pure function.
pub fn resolve_params_version(
    height: u64,
    versions: &[GlobalParamsVersion],
) -> Result<&GlobalParamsVersion, ParamsError> {
    versions
        .iter()
        .filter(|v| v.activation_height <= height)
        .max_by_key(|v| v.activation_height)
        .ok_or(ParamsError::NoMatchingVersion { height })
}

/// Source of the full ordered set of parameter versions.
///
/// Treated as an immutable snapshot for the duration of one withdrawal
/// computation. Transport failures are fatal to the attempt.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ParamsSource: Send + Sync {
    async fn fetch_versions(&self) -> Result<Vec<GlobalParamsVersion>, ParamsError>;
}

/// Fetches parameter versions from the staking API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpParamsSource {
    client: Client,
    url: String,
}

impl HttpParamsSource {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ParamsSource for HttpParamsSource {
    async fn fetch_versions(&self) -> Result<Vec<GlobalParamsVersion>, ParamsError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ParamsError::Fetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ParamsError::Fetch(format!(
                "{} returned {}",
                self.url,
                resp.status()
            )));
        }

        resp.json::<Vec<GlobalParamsVersion>>()
            .await
            .map_err(|e| ParamsError::Decode(e.to_string()))
    }
}

/// In-memory snapshot of parameter versions, for tests and offline use.
#[derive(Debug, Clone)]
pub struct StaticParamsSource {
    versions: Vec<GlobalParamsVersion>,
}

impl StaticParamsSource {
    pub fn new(versions: Vec<GlobalParamsVersion>) -> Self {
        Self { versions }
    }
}

#[async_trait]
impl ParamsSource for StaticParamsSource {
    async fn fetch_versions(&self) -> Result<Vec<GlobalParamsVersion>, ParamsError> {
        Ok(self.versions.clone())
    }
}

//! Environment-based Configuration
//!
//! # Environment Variables
//!
//! - `UNSTAKER_NETWORK` - "mainnet", "testnet" or "signet" (default: "signet")
//! - `UNSTAKER_PARAMS_URL` - staking API endpoint serving the global parameter versions
//! - `UNSTAKER_ESPLORA_URL` - Esplora API endpoint (defaults per network)
//! - `UNSTAKER_FEE_RATE` - default fee rate in sats/vbyte (default: 5)
//! - `UNSTAKER_SIGNER_KEY` - hex-encoded key for the local single-key signer
//! - `UNSTAKER_LOG_LEVEL` - logging level (debug, info, warn, error)

use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::esplora;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Target network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Signet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            _ => Err(ConfigError::InvalidValue(
                "UNSTAKER_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get default Esplora API for this network
    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Network::Mainnet => esplora::MAINNET_URL,
            Network::Testnet => esplora::TESTNET_URL,
            Network::Signet => esplora::SIGNET_URL,
        }
    }

    /// Get bitcoin network enum
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Signet => bitcoin::Network::Signet,
        }
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct UnstakerConfig {
    /// Target network
    pub network: Network,

    /// Staking API endpoint for global parameter versions
    pub params_url: String,

    /// Esplora API endpoint
    pub esplora_url: String,

    /// Default fee rate in sats/vbyte
    pub fee_rate: u64,

    /// Hex-encoded key for the local signer, if configured
    pub signer_key: Option<String>,

    /// Log level
    pub log_level: String,
}

impl UnstakerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("UNSTAKER_NETWORK")
            .unwrap_or_else(|_| "signet".to_string())
            .parse()?;

        let params_url = env::var("UNSTAKER_PARAMS_URL")
            .map_err(|_| ConfigError::MissingEnvVar("UNSTAKER_PARAMS_URL".to_string()))?;

        let esplora_url = env::var("UNSTAKER_ESPLORA_URL")
            .unwrap_or_else(|_| network.default_esplora_url().to_string());

        let fee_rate = match env::var("UNSTAKER_FEE_RATE") {
            Ok(v) => v.parse().map_err(|_| {
                ConfigError::InvalidValue("UNSTAKER_FEE_RATE".to_string(), v.clone())
            })?,
            Err(_) => 5,
        };

        let signer_key = env::var("UNSTAKER_SIGNER_KEY").ok().filter(|k| !k.is_empty());

        let log_level = env::var("UNSTAKER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            network,
            params_url,
            esplora_url,
            fee_rate,
            signer_key,
            log_level,
        })
    }
}

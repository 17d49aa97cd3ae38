//! Withdrawal Error Taxonomy
//!
//! Every failure in the withdrawal flow is terminal for the current
//! attempt: each one indicates either a data-integrity mismatch (wrong
//! parameters or scripts) or a condition where a blind retry could cause
//! duplicate or unsafe submissions. The caller decides whether to re-run
//! the whole flow from scratch, which re-resolves parameters and rebuilds
//! the transaction.

use thiserror::Error;

use crate::withdrawal::builder::BuildError;
use crate::withdrawal::fee::FeeError;
use crate::withdrawal::params::ParamsError;
use crate::withdrawal::scripts::ScriptError;
use crate::withdrawal::service::{BroadcastError, SignerError};

/// Root error type for a withdrawal attempt.
#[derive(Debug, Error)]
pub enum WithdrawalError {
    /// The identified delegation is not in the supplied set
    #[error("delegation not found: {0}")]
    DelegationNotFound(String),

    /// The parameter source yielded nothing to resolve against
    #[error("no parameter version available for staking height {height}")]
    CurrentVersionNotFound { height: u64 },

    /// Parameter resolution or retrieval failed
    #[error(transparent)]
    Params(#[from] ParamsError),

    /// Staking script derivation failed
    #[error("script derivation failed: {0}")]
    Script(#[from] ScriptError),

    /// Unsigned transaction construction failed
    #[error("cannot build unsigned withdrawal transaction: {0}")]
    Build(#[from] BuildError),

    /// The external signer errored, was cancelled, or returned malformed output
    #[error("failed to sign the withdrawal transaction: {0}")]
    Signing(#[from] SignerError),

    /// The signed transaction's fee falls outside the tolerated band
    #[error("fee safety violation: {0}")]
    FeeSafety(#[from] FeeError),

    /// The network rejected the broadcast
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] BroadcastError),
}

impl WithdrawalError {
    /// Stable code identifying the failure class.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DelegationNotFound(_) => "DELEGATION_NOT_FOUND",
            Self::CurrentVersionNotFound { .. } => "CURRENT_VERSION_NOT_FOUND",
            Self::Params(ParamsError::NoMatchingVersion { .. }) => "NO_MATCHING_VERSION",
            Self::Params(_) => "PARAMS_SOURCE_ERROR",
            Self::Script(_) => "SCRIPT_DERIVATION_ERROR",
            Self::Build(_) => "UNSIGNED_TX_BUILD_ERROR",
            Self::Signing(_) => "SIGNING_FAILED",
            Self::FeeSafety(_) => "FEE_SAFETY_VIOLATION",
            Self::Broadcast(_) => "BROADCAST_FAILED",
        }
    }
}

/// Result type alias using WithdrawalError
pub type Result<T> = std::result::Result<T, WithdrawalError>;

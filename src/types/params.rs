//! Global Parameter Types
//!
//! Versioned protocol parameters governing staking script derivation.
//! Multiple versions coexist; each is active from its activation height
//! until the next version activates.

use serde::{Deserialize, Serialize};

/// One version of the global protocol parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalParamsVersion {
    /// Monotonically increasing version number
    pub version: u32,
    /// First block height at which this version is active
    pub activation_height: u64,
    /// Magic bytes identifying staking transactions, hex encoded
    pub tag: String,
    /// Covenant committee public keys (x-only, hex)
    pub covenant_pks: Vec<String>,
    /// Number of covenant signatures required
    pub covenant_quorum: u32,
    /// Unbonding timelock in blocks
    pub unbonding_time: u16,
    /// Fixed fee of the unbonding transaction in satoshis
    pub unbonding_fee_sat: u64,
    /// Staking amount bounds in satoshis
    pub min_staking_amount_sat: u64,
    pub max_staking_amount_sat: u64,
    /// Staking timelock bounds in blocks
    pub min_staking_time_blocks: u16,
    pub max_staking_time_blocks: u16,
    /// Required confirmation depth for staking transactions
    pub confirmation_depth: u32,
}

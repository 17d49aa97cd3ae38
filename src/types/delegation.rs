//! Delegation Types
//!
//! Records describing a historical staking action, as returned by the
//! staking API. The withdrawal flow only reads these.

use serde::{Deserialize, Serialize};

/// A completed staking action and its on-chain transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    /// Hash of the staking transaction, used as the delegation identifier
    pub staking_tx_hash_hex: String,
    /// BIP-340 public key of the finality provider this stake delegates to
    pub finality_provider_pk_hex: String,
    /// Staker public key in coordinate-free (x-only) form
    pub staker_pk_hex: String,
    /// The staking transaction
    pub staking_tx: StakingTx,
    /// The unbonding transaction, present only if early unbonding was executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unbonding_tx: Option<UnbondingTx>,
}

/// The on-chain staking transaction and its staking-time context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingTx {
    /// Raw transaction, hex encoded
    pub tx_hex: String,
    /// Index of the staking output within the transaction
    pub output_index: u32,
    /// Block height at which the staking transaction was included
    pub start_height: u64,
    /// Staking timelock in blocks
    pub timelock: u16,
}

/// The on-chain unbonding transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbondingTx {
    /// Raw transaction, hex encoded
    pub tx_hex: String,
}

impl Delegation {
    /// Whether this delegation exited early via an unbonding transaction.
    pub fn is_unbonded_early(&self) -> bool {
        self.unbonding_tx.is_some()
    }
}

//! Withdrawal Transaction Builder
//!
//! Builds the unsigned transaction that returns staked funds to the
//! staker: either from the unbonding output after an early exit, or from
//! the staking output once its timelock has naturally expired. The two
//! paths are mutually exclusive and decided once, up front, from the
//! delegation record.

use std::str::FromStr;

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode as consensus;
use bitcoin::key::Secp256k1;
use bitcoin::psbt::Psbt;
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    XOnlyPublicKey,
};

use crate::types::{Delegation, GlobalParamsVersion};
use crate::withdrawal::scripts::StakingScriptSet;

/// The BIP-341 "nothing up my sleeve" internal key. Staking outputs commit
/// only to script paths; the key path must be unspendable.
const NUMS_KEY: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// Output index of the committed output within an unbonding transaction.
const UNBONDING_OUTPUT_INDEX: u32 = 0;

/// Outputs below this are uneconomical to create
const DUST_LIMIT_SATS: u64 = 546;

/// Schnorr signature plus sighash-type byte
const TAPROOT_SIGNATURE_SIZE: usize = 65;

/// Transaction construction errors. Fatal: a build failure usually means
/// the scripts or parameter version upstream are wrong, and retrying with
/// the same inputs cannot fix that.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("invalid source transaction: {0}")]
    InvalidTransaction(String),

    #[error("source transaction has no output at index {index} (outputs: {outputs})")]
    MissingOutput { index: u32, outputs: usize },

    #[error("reconstructed scripts do not match the output being spent")]
    ScriptCommitmentMismatch,

    #[error("insufficient value: output holds {available} sats, fee requires {required} sats")]
    InsufficientValue { available: u64, required: u64 },

    #[error("taproot tree construction failed: {0}")]
    Taproot(String),

    #[error("psbt construction failed: {0}")]
    Psbt(String),
}

/// Which output a withdrawal spends. Decided once from the delegation
/// record; never user-overridable.
#[derive(Debug, Clone)]
pub enum WithdrawalPath {
    /// Spend the unbonding transaction's committed output
    EarlyUnbonding { unbonding_tx: Transaction },
    /// Spend the original staking output after timelock expiry
    TimelockExpiry {
        staking_tx: Transaction,
        output_index: u32,
    },
}

impl WithdrawalPath {
    /// Derive the path from a delegation: an unbonding transaction being
    /// present selects the early-unbonding path, otherwise the stake is
    /// withdrawn from the naturally expired timelock output.
    pub fn for_delegation(delegation: &Delegation) -> Result<Self, BuildError> {
        match &delegation.unbonding_tx {
            Some(unbonding) => Ok(WithdrawalPath::EarlyUnbonding {
                unbonding_tx: decode_tx(&unbonding.tx_hex)?,
            }),
            None => Ok(WithdrawalPath::TimelockExpiry {
                staking_tx: decode_tx(&delegation.staking_tx.tx_hex)?,
                output_index: delegation.staking_tx.output_index,
            }),
        }
    }
}

/// An unsigned withdrawal transaction and its fee estimate, consumed
/// exactly once by the signing orchestrator.
#[derive(Debug, Clone)]
pub struct UnsignedWithdrawal {
    /// The unsigned transaction
    pub tx: Transaction,
    /// PSBT container handed to the external signer
    pub psbt: Psbt,
    /// Estimated fee baked into the transaction's output value
    pub fee: Amount,
}

impl UnsignedWithdrawal {
    pub fn txid(&self) -> String {
        self.tx.compute_txid().to_string()
    }

    /// Serialized PSBT for transit to the signer
    pub fn psbt_bytes(&self) -> Vec<u8> {
        self.psbt.serialize()
    }

    pub fn fee_sats(&self) -> u64 {
        self.fee.to_sat()
    }
}

/// Narrow capability over the two withdrawal constructions. The
/// orchestrator depends on this seam, not on the taproot plumbing.
pub trait WithdrawalTxFactory: Send + Sync {
    /// Spend the unbonding output via its unbonding-timelock leaf.
    fn build_early_unbonding_withdrawal(
        &self,
        scripts: &StakingScriptSet,
        unbonding_tx: &Transaction,
        destination: &Address,
        fee_rate: u64,
        unbonding_time: u16,
    ) -> Result<UnsignedWithdrawal, BuildError>;

    /// Spend the staking output via its timelock leaf.
    fn build_timelock_withdrawal(
        &self,
        scripts: &StakingScriptSet,
        staking_tx: &Transaction,
        output_index: u32,
        destination: &Address,
        fee_rate: u64,
        timelock: u16,
    ) -> Result<UnsignedWithdrawal, BuildError>;
}

/// Builds unsigned withdrawal transactions with the `bitcoin` crate's
/// taproot primitives.
pub struct WithdrawalBuilder {
    network: Network,
}

impl WithdrawalBuilder {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Validate a destination address for this builder's network.
    pub fn validate_address(&self, address: &str) -> Result<Address, BuildError> {
        Address::from_str(address)
            .map_err(|e| BuildError::InvalidAddress(e.to_string()))?
            .require_network(self.network)
            .map_err(|e| BuildError::InvalidAddress(e.to_string()))
    }

    /// Build the unsigned withdrawal for a delegation.
    ///
    /// Chooses the spending path from the delegation record, then spends
    /// the corresponding output with the matching script leaves. The fee
    /// estimate is `fee_rate` sats/vbyte applied to the projected size of
    /// the signed transaction.
    pub fn build(
        &self,
        delegation: &Delegation,
        scripts: &StakingScriptSet,
        params: &GlobalParamsVersion,
        destination: &str,
        fee_rate: u64,
    ) -> Result<UnsignedWithdrawal, BuildError> {
        let destination = self.validate_address(destination)?;

        match WithdrawalPath::for_delegation(delegation)? {
            WithdrawalPath::EarlyUnbonding { unbonding_tx } => self
                .build_early_unbonding_withdrawal(
                    scripts,
                    &unbonding_tx,
                    &destination,
                    fee_rate,
                    params.unbonding_time,
                ),
            WithdrawalPath::TimelockExpiry {
                staking_tx,
                output_index,
            } => self.build_timelock_withdrawal(
                scripts,
                &staking_tx,
                output_index,
                &destination,
                fee_rate,
                delegation.staking_tx.timelock,
            ),
        }
    }

    /// Spend `source_tx:output_index`, which must commit to exactly
    /// `leaves`, through the `spend_leaf` script path.
    fn spend_output(
        &self,
        source_tx: &Transaction,
        output_index: u32,
        leaves: &[&ScriptBuf],
        spend_leaf: &ScriptBuf,
        sequence_blocks: u16,
        destination: &Address,
        fee_rate: u64,
    ) -> Result<UnsignedWithdrawal, BuildError> {
        let prevout = source_tx
            .output
            .get(output_index as usize)
            .ok_or(BuildError::MissingOutput {
                index: output_index,
                outputs: source_tx.output.len(),
            })?
            .clone();

        let spend_info = taproot_commitment(leaves)?;
        let expected_spk = ScriptBuf::new_p2tr_tweaked(spend_info.output_key());
        if expected_spk != prevout.script_pubkey {
            return Err(BuildError::ScriptCommitmentMismatch);
        }

        let control_block = spend_info
            .control_block(&(spend_leaf.clone(), LeafVersion::TapScript))
            .ok_or_else(|| BuildError::Taproot("spend leaf missing from tree".to_string()))?;

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: source_tx.compute_txid(),
                    vout: output_index,
                },
                script_sig: ScriptBuf::new(),
                // relative timelock gate of the CSV in the spend leaf
                sequence: Sequence::from_height(sequence_blocks),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: prevout.value,
                script_pubkey: destination.script_pubkey(),
            }],
        };

        let fee = Amount::from_sat(
            fee_rate * estimate_signed_vsize(&tx, spend_leaf, &control_block) as u64,
        );
        let value_out = prevout
            .value
            .checked_sub(fee)
            .filter(|v| v.to_sat() > DUST_LIMIT_SATS)
            .ok_or(BuildError::InsufficientValue {
                available: prevout.value.to_sat(),
                required: fee.to_sat() + DUST_LIMIT_SATS,
            })?;
        tx.output[0].value = value_out;

        let mut psbt =
            Psbt::from_unsigned_tx(tx.clone()).map_err(|e| BuildError::Psbt(e.to_string()))?;
        psbt.inputs[0].witness_utxo = Some(prevout);
        psbt.inputs[0].tap_internal_key = Some(nums_key());
        psbt.inputs[0].tap_scripts.insert(
            control_block,
            (spend_leaf.clone(), LeafVersion::TapScript),
        );

        Ok(UnsignedWithdrawal { tx, psbt, fee })
    }
}

impl WithdrawalTxFactory for WithdrawalBuilder {
    fn build_early_unbonding_withdrawal(
        &self,
        scripts: &StakingScriptSet,
        unbonding_tx: &Transaction,
        destination: &Address,
        fee_rate: u64,
        unbonding_time: u16,
    ) -> Result<UnsignedWithdrawal, BuildError> {
        self.spend_output(
            unbonding_tx,
            UNBONDING_OUTPUT_INDEX,
            &[&scripts.unbonding_timelock_script, &scripts.slashing_script],
            &scripts.unbonding_timelock_script,
            unbonding_time,
            destination,
            fee_rate,
        )
    }

    fn build_timelock_withdrawal(
        &self,
        scripts: &StakingScriptSet,
        staking_tx: &Transaction,
        output_index: u32,
        destination: &Address,
        fee_rate: u64,
        timelock: u16,
    ) -> Result<UnsignedWithdrawal, BuildError> {
        self.spend_output(
            staking_tx,
            output_index,
            &[
                &scripts.timelock_script,
                &scripts.unbonding_script,
                &scripts.slashing_script,
            ],
            &scripts.timelock_script,
            timelock,
            destination,
            fee_rate,
        )
    }
}

/// Script pubkey of a staking output committing to the given script set.
pub fn staking_output_script(scripts: &StakingScriptSet) -> Result<ScriptBuf, BuildError> {
    let spend_info = taproot_commitment(&[
        &scripts.timelock_script,
        &scripts.unbonding_script,
        &scripts.slashing_script,
    ])?;
    Ok(ScriptBuf::new_p2tr_tweaked(spend_info.output_key()))
}

/// Script pubkey of an unbonding output committing to the given script set.
pub fn unbonding_output_script(scripts: &StakingScriptSet) -> Result<ScriptBuf, BuildError> {
    let spend_info = taproot_commitment(&[
        &scripts.unbonding_timelock_script,
        &scripts.slashing_script,
    ])?;
    Ok(ScriptBuf::new_p2tr_tweaked(spend_info.output_key()))
}

fn taproot_commitment(leaves: &[&ScriptBuf]) -> Result<TaprootSpendInfo, BuildError> {
    let secp = Secp256k1::verification_only();
    TaprootBuilder::with_huffman_tree(leaves.iter().map(|leaf| (1u32, (*leaf).clone())))
        .map_err(|e| BuildError::Taproot(e.to_string()))?
        .finalize(&secp, nums_key())
        .map_err(|e| BuildError::Taproot(format!("{:?}", e)))
}

fn nums_key() -> XOnlyPublicKey {
    XOnlyPublicKey::from_slice(&NUMS_KEY).expect("hardcoded NUMS point is valid")
}

/// Projected vsize once the script-path witness (signature, leaf script,
/// control block) is attached.
fn estimate_signed_vsize(tx: &Transaction, spend_leaf: &ScriptBuf, cb: &ControlBlock) -> usize {
    let witness_bytes = 1 // element count
        + 1 + TAPROOT_SIGNATURE_SIZE
        + compact_size_len(spend_leaf.len()) + spend_leaf.len()
        + compact_size_len(cb.size()) + cb.size();
    // segwit marker and flag weigh 2, witness bytes weigh 1 each
    tx.vsize() + (2 + witness_bytes).div_ceil(4)
}

fn compact_size_len(n: usize) -> usize {
    if n < 253 {
        1
    } else {
        3
    }
}

fn decode_tx(tx_hex: &str) -> Result<Transaction, BuildError> {
    let bytes = hex::decode(tx_hex).map_err(|e| BuildError::InvalidTransaction(e.to_string()))?;
    consensus::deserialize(&bytes).map_err(|e| BuildError::InvalidTransaction(e.to_string()))
}

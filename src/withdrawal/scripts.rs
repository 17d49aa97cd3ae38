//! Staking Script Reconstruction
//!
//! Rebuilds the four spending scripts committed to by a staking output:
//! timelock, slashing, unbonding and unbonding-timelock. Derivation is a
//! pure function of (finality-provider key, timelock, parameter version,
//! staker key) and must be byte-exact: any deviation yields a script set
//! that does not match the on-chain output.

use bitcoin::opcodes::all::*;
use bitcoin::script::Builder as ScriptBuilder;
use bitcoin::{ScriptBuf, XOnlyPublicKey};

use crate::types::GlobalParamsVersion;

/// Script derivation errors. All are fatal to the withdrawal attempt.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("invalid public key {0:?}: {1}")]
    InvalidKey(String, String),

    #[error("covenant committee is empty")]
    EmptyCovenantCommittee,

    #[error("covenant quorum {quorum} exceeds committee size {committee}")]
    QuorumExceedsCommittee { quorum: u32, committee: usize },

    #[error("covenant quorum must be positive")]
    ZeroQuorum,

    #[error("staking timelock {timelock} outside allowed range [{min}, {max}]")]
    TimelockOutOfRange { timelock: u16, min: u16, max: u16 },
}

/// The four derived spending scripts of a staking output.
///
/// Recomputed on demand; never cached across parameter versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingScriptSet {
    /// Staker spend after the staking timelock expires
    pub timelock_script: ScriptBuf,
    /// Punitive spend requiring staker, finality provider and covenant quorum
    pub slashing_script: ScriptBuf,
    /// Early-exit spend requiring staker and covenant quorum
    pub unbonding_script: ScriptBuf,
    /// Staker spend after the unbonding timelock expires
    pub unbonding_timelock_script: ScriptBuf,
}

/// Reconstruct the staking script set using the derivation rules encoded in
/// the resolved parameter version.
pub fn reconstruct_staking_scripts(
    finality_provider_pk_hex: &str,
    staking_timelock: u16,
    params: &GlobalParamsVersion,
    staker_pk_hex: &str,
) -> Result<StakingScriptSet, ScriptError> {
    if staking_timelock < params.min_staking_time_blocks
        || staking_timelock > params.max_staking_time_blocks
    {
        return Err(ScriptError::TimelockOutOfRange {
            timelock: staking_timelock,
            min: params.min_staking_time_blocks,
            max: params.max_staking_time_blocks,
        });
    }

    let staker_pk = parse_x_only_key(staker_pk_hex)?;
    let fp_pk = parse_x_only_key(finality_provider_pk_hex)?;
    let covenant_keys = parse_covenant_keys(params)?;

    Ok(StakingScriptSet {
        timelock_script: single_key_timelock_script(&staker_pk, staking_timelock),
        slashing_script: slashing_script(&staker_pk, &fp_pk, &covenant_keys, params.covenant_quorum),
        unbonding_script: unbonding_script(&staker_pk, &covenant_keys, params.covenant_quorum),
        unbonding_timelock_script: single_key_timelock_script(&staker_pk, params.unbonding_time),
    })
}

/// Parse an x-only public key from its coordinate-free hex form.
pub fn parse_x_only_key(hex_str: &str) -> Result<XOnlyPublicKey, ScriptError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ScriptError::InvalidKey(hex_str.to_string(), e.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes)
        .map_err(|e| ScriptError::InvalidKey(hex_str.to_string(), e.to_string()))
}

fn parse_covenant_keys(params: &GlobalParamsVersion) -> Result<Vec<XOnlyPublicKey>, ScriptError> {
    if params.covenant_pks.is_empty() {
        return Err(ScriptError::EmptyCovenantCommittee);
    }
    if params.covenant_quorum == 0 {
        return Err(ScriptError::ZeroQuorum);
    }
    if params.covenant_quorum as usize > params.covenant_pks.len() {
        return Err(ScriptError::QuorumExceedsCommittee {
            quorum: params.covenant_quorum,
            committee: params.covenant_pks.len(),
        });
    }

    params
        .covenant_pks
        .iter()
        .map(|pk| parse_x_only_key(pk))
        .collect()
}

/// `<pk> OP_CHECKSIGVERIFY <blocks> OP_CHECKSEQUENCEVERIFY`
fn single_key_timelock_script(pk: &XOnlyPublicKey, blocks: u16) -> ScriptBuf {
    ScriptBuilder::new()
        .push_x_only_key(pk)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

/// `<staker> OP_CHECKSIGVERIFY <covenant quorum check>`
fn unbonding_script(
    staker_pk: &XOnlyPublicKey,
    covenant_keys: &[XOnlyPublicKey],
    quorum: u32,
) -> ScriptBuf {
    let builder = ScriptBuilder::new()
        .push_x_only_key(staker_pk)
        .push_opcode(OP_CHECKSIGVERIFY);
    covenant_multisig(builder, covenant_keys, quorum).into_script()
}

/// `<staker> OP_CHECKSIGVERIFY <fp> OP_CHECKSIGVERIFY <covenant quorum check>`
fn slashing_script(
    staker_pk: &XOnlyPublicKey,
    fp_pk: &XOnlyPublicKey,
    covenant_keys: &[XOnlyPublicKey],
    quorum: u32,
) -> ScriptBuf {
    let builder = ScriptBuilder::new()
        .push_x_only_key(staker_pk)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(fp_pk)
        .push_opcode(OP_CHECKSIGVERIFY);
    covenant_multisig(builder, covenant_keys, quorum).into_script()
}

/// Append a k-of-n check over the covenant committee.
///
/// Keys are sorted by their serialized form so the same committee always
/// produces the same bytes regardless of declaration order. Single-key
/// committees degenerate to a plain `OP_CHECKSIG`.
fn covenant_multisig(
    mut builder: ScriptBuilder,
    covenant_keys: &[XOnlyPublicKey],
    quorum: u32,
) -> ScriptBuilder {
    let mut sorted: Vec<&XOnlyPublicKey> = covenant_keys.iter().collect();
    sorted.sort_by_key(|pk| pk.serialize());

    if sorted.len() == 1 {
        return builder.push_x_only_key(sorted[0]).push_opcode(OP_CHECKSIG);
    }

    for (i, pk) in sorted.iter().enumerate() {
        builder = builder.push_x_only_key(pk);
        if i == 0 {
            builder = builder.push_opcode(OP_CHECKSIG);
        } else {
            builder = builder.push_opcode(OP_CHECKSIGADD);
        }
    }
    builder.push_int(quorum as i64).push_opcode(OP_NUMEQUAL)
}

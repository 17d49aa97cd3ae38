//! Unstaker - Staking Withdrawal Library
//!
//! Rebuilds the spending conditions of historical BTC staking outputs and
//! returns the funds to the staker. The flow resolves the protocol
//! parameter version that was active when the stake confirmed, derives the
//! four staking scripts from it, builds the unsigned withdrawal along the
//! path the delegation record dictates, hands the PSBT to a signer, gates
//! the signed result on a fee safety check and broadcasts it.
//!
//! # Modules
//!
//! - `withdrawal` - parameter resolution, script derivation, transaction
//!   building, fee safety and orchestration
//! - `types` - delegation and parameter records as the staking API serves them
//! - `esplora` - chain queries and transaction broadcast
//! - `config` - environment-based configuration
//! - `logging` - structured logging setup
//! - `common` - shared error types

pub mod common;
pub mod config;
pub mod esplora;
pub mod logging;
pub mod types;
pub mod withdrawal;

// Re-export the surface most callers need
pub use common::{Result, WithdrawalError};
pub use config::UnstakerConfig;
pub use esplora::EsploraClient;
pub use types::{Delegation, GlobalParamsVersion};
pub use withdrawal::{
    PsbtSigner, SingleKeySigner, TxBroadcaster, UnsignedWithdrawal, WithdrawalOutcome,
    WithdrawalService,
};

/// Shared fixtures for the withdrawal test suites.
#[cfg(test)]
pub mod testutil {
    use bitcoin::absolute::LockTime;
    use bitcoin::consensus::encode as consensus;
    use bitcoin::key::Secp256k1;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
    };

    use crate::types::{Delegation, GlobalParamsVersion, StakingTx, UnbondingTx};
    use crate::withdrawal::builder::{staking_output_script, unbonding_output_script};
    use crate::withdrawal::scripts::{
        parse_x_only_key, reconstruct_staking_scripts, StakingScriptSet,
    };
    use crate::withdrawal::service::SingleKeySigner;

    /// Finality provider key used across fixtures.
    pub const FP_PK: &str = "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    /// Internal key of the fixture destination address.
    const DESTINATION_KEY: &str =
        "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    const STAKED_SATS: u64 = 100_000;
    const STAKING_TIMELOCK: u16 = 150;
    const START_HEIGHT: u64 = 200_000;

    /// A delegation, the scripts its staking output commits to, and the
    /// key that staked it.
    pub struct DelegationFixture {
        pub delegation: Delegation,
        pub scripts: StakingScriptSet,
        pub staking_tx: Transaction,
        pub unbonding_tx: Option<Transaction>,
        pub staker: SingleKeySigner,
    }

    /// Parameter version active at the fixture's staking height.
    pub fn params_fixture() -> GlobalParamsVersion {
        GlobalParamsVersion {
            version: 2,
            activation_height: 100_000,
            tag: "62627434".to_string(),
            covenant_pks: vec![
                "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9".to_string(),
                "e493dbf1c10d80f3581e4904930b1404cc6c13900ee0758474fa94abe8c4cd13".to_string(),
                "2f8bde4d1a07209355b4a7250a5c5128e88b84bddc619ab7cba8d569b240efe4".to_string(),
            ],
            covenant_quorum: 2,
            unbonding_time: 101,
            unbonding_fee_sat: 2_000,
            min_staking_amount_sat: 50_000,
            max_staking_amount_sat: 5_000_000,
            min_staking_time_blocks: 64,
            max_staking_time_blocks: 64_000,
            confirmation_depth: 10,
        }
    }

    /// Build a delegation whose staking output commits to scripts derived
    /// from a freshly generated staker key. With `early` set, an unbonding
    /// transaction spending the stake is attached, selecting the
    /// early-unbonding withdrawal path.
    pub fn delegation_fixture(early: bool) -> DelegationFixture {
        let staker = SingleKeySigner::generate();
        let staker_pk_hex = staker.public_key_hex();
        let params = params_fixture();

        let scripts =
            reconstruct_staking_scripts(FP_PK, STAKING_TIMELOCK, &params, &staker_pk_hex)
                .unwrap();

        let staking_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(STAKED_SATS),
                script_pubkey: staking_output_script(&scripts).unwrap(),
            }],
        };

        let unbonding_tx = early.then(|| Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: staking_tx.compute_txid(),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(STAKED_SATS - params.unbonding_fee_sat),
                script_pubkey: unbonding_output_script(&scripts).unwrap(),
            }],
        });

        let delegation = Delegation {
            staking_tx_hash_hex: staking_tx.compute_txid().to_string(),
            finality_provider_pk_hex: FP_PK.to_string(),
            staker_pk_hex,
            staking_tx: StakingTx {
                tx_hex: consensus::serialize_hex(&staking_tx),
                output_index: 0,
                start_height: START_HEIGHT,
                timelock: STAKING_TIMELOCK,
            },
            unbonding_tx: unbonding_tx.as_ref().map(|tx| UnbondingTx {
                tx_hex: consensus::serialize_hex(tx),
            }),
        };

        DelegationFixture {
            delegation,
            scripts,
            staking_tx,
            unbonding_tx,
            staker,
        }
    }

    /// Deterministic taproot destination for the given network.
    pub fn destination_address(network: Network) -> String {
        let secp = Secp256k1::verification_only();
        let internal = parse_x_only_key(DESTINATION_KEY).unwrap();
        Address::p2tr(&secp, internal, None, network).to_string()
    }
}

//! Staking Withdrawal Flow
//!
//! Reconstructs the spending conditions of a historical staking action
//! and returns the funds to the staker.
//!
//! # Flow
//!
//! ```text
//! delegation record + parameter versions
//!        |
//!        v
//!   resolve params version at staking height      (params)
//!        |
//!        v
//!   reconstruct the four staking scripts          (scripts)
//!        |
//!        v
//!   build unsigned withdrawal tx + fee estimate   (builder)
//!        |                                          early-unbonding path
//!        v                                          or timelock-expiry path
//!   external signer (PSBT)                        (service)
//!        |
//!        v
//!   fee safety check                              (fee)
//!        |
//!        v
//!   broadcast                                     (service)
//! ```
//!
//! Every step is fatal on failure; nothing is retried internally.

pub mod builder;
pub mod fee;
pub mod params;
pub mod scripts;
pub mod service;

// Re-exports
pub use builder::{
    staking_output_script, unbonding_output_script, BuildError, UnsignedWithdrawal,
    WithdrawalBuilder, WithdrawalPath, WithdrawalTxFactory,
};
pub use fee::{check_fee_safety, FeeError, FEE_RATE_TOLERANCE};
pub use params::{
    resolve_params_version, HttpParamsSource, ParamsError, ParamsSource, StaticParamsSource,
};
pub use scripts::{reconstruct_staking_scripts, ScriptError, StakingScriptSet};
pub use service::{
    BroadcastError, NoopNotifier, PsbtSigner, SignerError, SingleKeySigner, TxBroadcaster,
    WithdrawalNotifier, WithdrawalOutcome, WithdrawalService, WithdrawalState,
};

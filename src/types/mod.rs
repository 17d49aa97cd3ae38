//! Shared Types Module
//!
//! Data types exchanged with the staking API and across the withdrawal flow.

pub mod delegation;
pub mod params;
pub mod units;

// Re-exports for convenience
pub use delegation::{Delegation, StakingTx, UnbondingTx};
pub use params::GlobalParamsVersion;
pub use units::{format_sats, sats_to_btc, SATS_PER_BTC};

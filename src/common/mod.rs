//! Common Infrastructure Module
//!
//! Shared error types for the withdrawal flow.

pub mod error;

// Re-exports for convenience
pub use error::{Result, WithdrawalError};

//! Post-Signing Fee Safety Check
//!
//! The signed transaction's size can differ from the unsigned estimate
//! (witness and signature size variance), which shifts the effective fee
//! rate. This is the last automated checkpoint before funds leave the
//! wallet: a transaction whose realized rate falls outside the tolerated
//! band is never broadcast.

use bitcoin::Amount;
use bitcoin::Transaction;

/// Maximum allowed multiple of the requested fee rate.
///
/// The realized rate may drift above the request through size variance,
/// but paying more than twice the asked rate means the fee estimate and
/// the signed transaction disagree badly enough to suspect fund loss.
pub const FEE_RATE_TOLERANCE: f64 = 2.0;

/// Fee safety violations. Fatal: the transaction must not be broadcast.
#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    #[error("effective fee rate is not positive (fee {fee} sats, vsize {vsize})")]
    NonPositiveRate { fee: u64, vsize: usize },

    #[error(
        "effective fee rate {effective:.2} sat/vB exceeds {max:.2} sat/vB \
         ({tolerance}x the requested {requested} sat/vB)"
    )]
    AboveTolerance {
        effective: f64,
        requested: u64,
        max: f64,
        tolerance: f64,
    },
}

/// Validate the fee implied by `estimated_fee` against the signed
/// transaction's virtual size. Passes iff
/// `0 < effective_rate <= requested_fee_rate * FEE_RATE_TOLERANCE`.
pub fn check_fee_safety(
    signed_tx: &Transaction,
    requested_fee_rate: u64,
    estimated_fee: Amount,
) -> Result<(), FeeError> {
    let vsize = signed_tx.vsize();
    let fee = estimated_fee.to_sat();

    let effective = fee as f64 / vsize as f64;
    if effective <= 0.0 {
        return Err(FeeError::NonPositiveRate { fee, vsize });
    }

    let max = requested_fee_rate as f64 * FEE_RATE_TOLERANCE;
    if effective > max {
        return Err(FeeError::AboveTolerance {
            effective,
            requested: requested_fee_rate,
            max,
            tolerance: FEE_RATE_TOLERANCE,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Witness};
    use proptest::prelude::*;

    /// A bare transaction with a witness padded to reach roughly the
    /// requested virtual size.
    fn tx_with_vsize(target_vsize: usize) -> Transaction {
        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        let base = tx.vsize();
        if target_vsize > base {
            tx.input[0]
                .witness
                .push(vec![0u8; (target_vsize - base) * 4]);
        }
        tx
    }

    #[test]
    fn test_exact_estimate_passes() {
        let tx = tx_with_vsize(150);
        let fee = Amount::from_sat(150 * 10);
        assert!(check_fee_safety(&tx, 10, fee).is_ok());
    }

    #[test]
    fn test_rate_at_tolerance_boundary_passes() {
        let tx = tx_with_vsize(100);
        // effective rate exactly requested * tolerance
        let fee = Amount::from_sat((tx.vsize() as f64 * 10.0 * FEE_RATE_TOLERANCE) as u64);
        assert!(check_fee_safety(&tx, 10, fee).is_ok());
    }

    #[test]
    fn test_rate_just_above_boundary_fails() {
        let tx = tx_with_vsize(100);
        let fee = Amount::from_sat((tx.vsize() as f64 * 10.0 * FEE_RATE_TOLERANCE) as u64 + 1);
        let err = check_fee_safety(&tx, 10, fee).unwrap_err();
        assert!(matches!(err, FeeError::AboveTolerance { .. }));
    }

    #[test]
    fn test_zero_fee_fails() {
        let tx = tx_with_vsize(150);
        let err = check_fee_safety(&tx, 10, Amount::from_sat(0)).unwrap_err();
        assert!(matches!(err, FeeError::NonPositiveRate { fee: 0, .. }));
    }

    #[test]
    fn test_tenfold_rate_fails() {
        let tx = tx_with_vsize(100);
        let fee = Amount::from_sat(tx.vsize() as u64 * 50);
        let err = check_fee_safety(&tx, 5, fee).unwrap_err();
        assert!(matches!(err, FeeError::AboveTolerance { .. }));
    }

    proptest! {
        /// The checker passes exactly when 0 < effective <= requested * tolerance.
        #[test]
        fn prop_boundary_behavior(
            requested in 1u64..500,
            vsize in 80usize..10_000,
            fee in 1u64..5_000_000,
        ) {
            let tx = tx_with_vsize(vsize);
            let effective = fee as f64 / tx.vsize() as f64;
            let within = effective <= requested as f64 * FEE_RATE_TOLERANCE;

            let result = check_fee_safety(&tx, requested, Amount::from_sat(fee));
            prop_assert_eq!(result.is_ok(), within);
        }
    }
}

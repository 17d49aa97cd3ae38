//! Withdrawal Orchestration
//!
//! Sequences one withdrawal end to end: build the unsigned transaction,
//! hand it to the external signer, gate the result on the fee safety
//! check, then broadcast. Side effects are strictly ordered and nothing
//! is retried internally: every failure mode here either indicates a
//! data-integrity mismatch or a condition where a blind retry could cause
//! duplicate or unsafe submissions.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::consensus::encode as consensus;
use bitcoin::hashes::Hash;
use bitcoin::key::Keypair;
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{self, Message, Secp256k1, SecretKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{self, TapLeafHash};
use bitcoin::{Network, Transaction, Witness, XOnlyPublicKey};
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::common::error::WithdrawalError;
use crate::types::Delegation;
use crate::withdrawal::builder::{UnsignedWithdrawal, WithdrawalBuilder};
use crate::withdrawal::fee::check_fee_safety;
use crate::withdrawal::params::{resolve_params_version, ParamsSource};
use crate::withdrawal::scripts::reconstruct_staking_scripts;

/// Lifecycle of one withdrawal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalState {
    Built,
    AwaitingSignature,
    Signed,
    FeeChecked,
    Broadcast,
    Failed,
}

impl std::fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Built => write!(f, "built"),
            Self::AwaitingSignature => write!(f, "awaiting-signature"),
            Self::Signed => write!(f, "signed"),
            Self::FeeChecked => write!(f, "fee-checked"),
            Self::Broadcast => write!(f, "broadcast"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Signing errors
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed psbt: {0}")]
    MalformedPsbt(String),

    #[error("psbt input is missing its witness utxo")]
    MissingWitnessUtxo,

    #[error("psbt input is missing its taproot spend leaf")]
    MissingSpendLeaf,

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("signing rejected: {0}")]
    Rejected(String),
}

/// Broadcast errors
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast transport error: {0}")]
    Transport(String),

    #[error("transaction rejected by the network: {0}")]
    Rejected(String),
}

/// External signer. Receives the serialized PSBT, returns the fully
/// signed raw transaction. May block indefinitely on user interaction.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PsbtSigner: Send + Sync {
    async fn sign_psbt(&self, psbt_bytes: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// External broadcaster. Returns the network-assigned transaction id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    async fn broadcast(&self, tx_hex: &str) -> Result<String, BroadcastError>;
}

/// Lifecycle notification sink. Both checkpoints default to no-ops.
pub trait WithdrawalNotifier: Send + Sync {
    fn on_awaiting_signature(&self) {}
    fn on_ready_to_broadcast(&self) {}
}

/// Null-object notifier.
pub struct NoopNotifier;

impl WithdrawalNotifier for NoopNotifier {}

/// Outcome of a completed withdrawal.
#[derive(Debug, Clone)]
pub struct WithdrawalOutcome {
    /// Signed transaction, hex encoded
    pub tx_hex: String,
    /// Network-assigned transaction id
    pub txid: String,
    /// Fee paid, in satoshis
    pub fee_sats: u64,
    /// Terminal state, always `Broadcast` on success
    pub state: WithdrawalState,
}

/// Orchestrates withdrawals against a fixed set of collaborators.
///
/// Each invocation runs a single linear flow over its own delegation and
/// parameter snapshot; no state is shared between in-flight withdrawals.
pub struct WithdrawalService {
    builder: WithdrawalBuilder,
    params: Arc<dyn ParamsSource>,
    signer: Arc<dyn PsbtSigner>,
    broadcaster: Arc<dyn TxBroadcaster>,
    notifier: Arc<dyn WithdrawalNotifier>,
}

impl WithdrawalService {
    pub fn new(
        network: Network,
        params: Arc<dyn ParamsSource>,
        signer: Arc<dyn PsbtSigner>,
        broadcaster: Arc<dyn TxBroadcaster>,
    ) -> Self {
        Self {
            builder: WithdrawalBuilder::new(network),
            params,
            signer,
            broadcaster,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn WithdrawalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Build the unsigned withdrawal transaction for the delegation
    /// identified by `staking_tx_hash_hex`.
    ///
    /// Replays the parameter version active at the delegation's staking
    /// height, reconstructs the staking scripts from it, and builds the
    /// spend along the path the delegation record dictates.
    pub async fn create_withdrawal_tx(
        &self,
        staking_tx_hash_hex: &str,
        delegations: &[Delegation],
        destination: &str,
        fee_rate: u64,
    ) -> Result<UnsignedWithdrawal, WithdrawalError> {
        // Delegation lookup comes first; nothing is derived for an
        // unknown stake.
        let delegation = delegations
            .iter()
            .find(|d| d.staking_tx_hash_hex == staking_tx_hash_hex)
            .ok_or_else(|| WithdrawalError::DelegationNotFound(staking_tx_hash_hex.to_string()))?;

        let versions = self.params.fetch_versions().await?;
        let height = delegation.staking_tx.start_height;
        if versions.is_empty() {
            return Err(WithdrawalError::CurrentVersionNotFound { height });
        }

        // State of the global params when the staking transaction was
        // submitted, never the version current now.
        let params_when_staking = resolve_params_version(height, &versions)?;

        let scripts = reconstruct_staking_scripts(
            &delegation.finality_provider_pk_hex,
            delegation.staking_tx.timelock,
            params_when_staking,
            &delegation.staker_pk_hex,
        )?;

        let unsigned = self.builder.build(
            delegation,
            &scripts,
            params_when_staking,
            destination,
            fee_rate,
        )?;

        info!(
            target: "unstaker::withdrawal",
            staking_tx = staking_tx_hash_hex,
            params_version = params_when_staking.version,
            early_unbonding = delegation.is_unbonded_early(),
            fee_sats = unsigned.fee_sats(),
            "unsigned withdrawal built"
        );

        Ok(unsigned)
    }

    /// Run the full withdrawal: build, sign, fee-check, broadcast.
    ///
    /// `Built -> AwaitingSignature -> Signed -> FeeChecked -> Broadcast`;
    /// any error is terminal for this attempt and surfaced with its
    /// cause. Abandoning the returned future before the signer resolves
    /// leaves no partial state behind.
    pub async fn sign_withdrawal_tx(
        &self,
        staking_tx_hash_hex: &str,
        delegations: &[Delegation],
        destination: &str,
        fee_rate: u64,
    ) -> Result<WithdrawalOutcome, WithdrawalError> {
        let unsigned = self
            .create_withdrawal_tx(staking_tx_hash_hex, delegations, destination, fee_rate)
            .await?;

        self.notifier.on_awaiting_signature();

        let signed_bytes = self.signer.sign_psbt(&unsigned.psbt_bytes()).await?;
        let signed_tx: Transaction = consensus::deserialize(&signed_bytes)
            .map_err(|e| WithdrawalError::Signing(SignerError::SigningFailed(e.to_string())))?;

        check_fee_safety(&signed_tx, fee_rate, unsigned.fee)?;

        self.notifier.on_ready_to_broadcast();

        let tx_hex = consensus::serialize_hex(&signed_tx);
        let txid = self.broadcaster.broadcast(&tx_hex).await?;

        info!(
            target: "unstaker::withdrawal",
            staking_tx = staking_tx_hash_hex,
            txid = txid,
            fee_sats = unsigned.fee_sats(),
            "withdrawal broadcast"
        );

        Ok(WithdrawalOutcome {
            tx_hex,
            txid,
            fee_sats: unsigned.fee_sats(),
            state: WithdrawalState::Broadcast,
        })
    }
}

/// Local single-key signer.
///
/// Signs the PSBT's script-path input with a Schnorr signature over the
/// taproot sighash. Suitable for tests and operator-held keys; real
/// deployments hand the PSBT to a wallet.
#[derive(Clone)]
pub struct SingleKeySigner {
    secret_key: SecretKey,
    secp: Secp256k1<secp256k1::All>,
}

impl SingleKeySigner {
    pub fn from_hex(hex_key: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(hex_key).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self {
            secret_key,
            secp: Secp256k1::new(),
        })
    }

    pub fn generate() -> Self {
        Self {
            secret_key: SecretKey::new(&mut rand::thread_rng()),
            secp: Secp256k1::new(),
        }
    }

    pub fn public_key(&self) -> XOnlyPublicKey {
        let keypair = Keypair::from_secret_key(&self.secp, &self.secret_key);
        XOnlyPublicKey::from_keypair(&keypair).0
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().serialize())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    fn sign_script_spend(&self, psbt: &Psbt) -> Result<Transaction, SignerError> {
        let mut tx = psbt.unsigned_tx.clone();

        let prevouts: Vec<_> = psbt
            .inputs
            .iter()
            .map(|input| {
                input
                    .witness_utxo
                    .clone()
                    .ok_or(SignerError::MissingWitnessUtxo)
            })
            .collect::<Result<_, _>>()?;
        let prevouts = Prevouts::All(&prevouts);

        let keypair = Keypair::from_secret_key(&self.secp, &self.secret_key);

        for (i, psbt_input) in psbt.inputs.iter().enumerate() {
            let (control_block, (leaf_script, leaf_version)) = psbt_input
                .tap_scripts
                .iter()
                .next()
                .ok_or(SignerError::MissingSpendLeaf)?;

            let leaf_hash = TapLeafHash::from_script(leaf_script, *leaf_version);
            let sighash = SighashCache::new(&tx)
                .taproot_script_spend_signature_hash(
                    i,
                    &prevouts,
                    leaf_hash,
                    TapSighashType::Default,
                )
                .map_err(|e| SignerError::SigningFailed(e.to_string()))?;

            let msg = Message::from_digest_slice(sighash.as_byte_array())
                .map_err(|e| SignerError::SigningFailed(e.to_string()))?;
            // script-path spends sign with the untweaked key
            let sig = self.secp.sign_schnorr(&msg, &keypair);
            let signature = taproot::Signature {
                signature: sig,
                sighash_type: TapSighashType::Default,
            };

            tx.input[i].witness = Witness::from_slice(&[
                signature.to_vec(),
                leaf_script.to_bytes(),
                control_block.serialize(),
            ]);
        }

        Ok(tx)
    }
}

#[async_trait]
impl PsbtSigner for SingleKeySigner {
    async fn sign_psbt(&self, psbt_bytes: &[u8]) -> Result<Vec<u8>, SignerError> {
        let psbt =
            Psbt::deserialize(psbt_bytes).map_err(|e| SignerError::MalformedPsbt(e.to_string()))?;
        let signed = self.sign_script_spend(&psbt)?;
        Ok(consensus::serialize(&signed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, ScriptBuf, Sequence, TxIn};

    use crate::testutil::{delegation_fixture, params_fixture, DelegationFixture};
    use crate::withdrawal::params::{MockParamsSource, StaticParamsSource};

    const FEE_RATE: u64 = 5;

    /// Records lifecycle checkpoints into a shared event log.
    struct RecordingNotifier {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl WithdrawalNotifier for RecordingNotifier {
        fn on_awaiting_signature(&self) {
            self.events.lock().unwrap().push("awaiting-signature");
        }
        fn on_ready_to_broadcast(&self) {
            self.events.lock().unwrap().push("ready-to-broadcast");
        }
    }

    /// Counts broadcasts and records them into the shared event log.
    struct RecordingBroadcaster {
        events: Arc<Mutex<Vec<&'static str>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TxBroadcaster for RecordingBroadcaster {
        async fn broadcast(&self, _tx_hex: &str) -> Result<String, BroadcastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push("broadcast");
            Ok("txid-from-network".to_string())
        }
    }

    struct Harness {
        service: WithdrawalService,
        fixture: DelegationFixture,
        events: Arc<Mutex<Vec<&'static str>>>,
        broadcasts: Arc<AtomicUsize>,
    }

    fn harness(early: bool, signer: Arc<dyn PsbtSigner>) -> Harness {
        let fixture = delegation_fixture(early);
        let events = Arc::new(Mutex::new(Vec::new()));
        let broadcasts = Arc::new(AtomicUsize::new(0));

        let service = WithdrawalService::new(
            Network::Signet,
            Arc::new(StaticParamsSource::new(vec![params_fixture()])),
            signer,
            Arc::new(RecordingBroadcaster {
                events: events.clone(),
                calls: broadcasts.clone(),
            }),
        )
        .with_notifier(Arc::new(RecordingNotifier {
            events: events.clone(),
        }));

        Harness {
            service,
            fixture,
            events,
            broadcasts,
        }
    }

    fn destination() -> String {
        crate::testutil::destination_address(Network::Signet)
    }

    #[tokio::test]
    async fn test_full_flow_with_real_signer_on_expiry_path() {
        let fixture = delegation_fixture(false);
        let signer = Arc::new(fixture.staker.clone());
        let h = harness(false, signer);
        // reuse the staker key that the fixture staked with
        let delegations = vec![fixture.delegation.clone()];

        let outcome = h
            .service
            .sign_withdrawal_tx(
                &fixture.delegation.staking_tx_hash_hex,
                &delegations,
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap();

        assert_eq!(outcome.txid, "txid-from-network");
        assert_eq!(outcome.state, WithdrawalState::Broadcast);
        assert!(outcome.fee_sats > 0);

        // signature + leaf script + control block
        let signed: Transaction = consensus::deserialize(&hex::decode(&outcome.tx_hex).unwrap()).unwrap();
        assert_eq!(signed.input[0].witness.len(), 3);
    }

    #[tokio::test]
    async fn test_full_flow_on_early_unbonding_path() {
        let h = harness(true, Arc::new(h_signer()));
        let delegations = vec![h.fixture.delegation.clone()];

        let outcome = h
            .service
            .sign_withdrawal_tx(
                &h.fixture.delegation.staking_tx_hash_hex,
                &delegations,
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap();

        assert_eq!(outcome.state, WithdrawalState::Broadcast);
        assert_eq!(h.broadcasts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_notifications_fire_in_order() {
        let h = harness(false, Arc::new(h_signer()));
        let delegations = vec![h.fixture.delegation.clone()];

        h.service
            .sign_withdrawal_tx(
                &h.fixture.delegation.staking_tx_hash_hex,
                &delegations,
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap();

        let events = h.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["awaiting-signature", "ready-to-broadcast", "broadcast"]
        );
    }

    #[tokio::test]
    async fn test_unknown_delegation_fails_before_any_derivation() {
        let mut params = MockParamsSource::new();
        // params must never be fetched for an unknown delegation
        params.expect_fetch_versions().times(0);

        let h_fixture = delegation_fixture(false);
        let service = WithdrawalService::new(
            Network::Signet,
            Arc::new(params),
            Arc::new(h_signer()),
            Arc::new(failing_broadcaster()),
        );

        let err = service
            .create_withdrawal_tx(
                "ffff00000000000000000000000000000000000000000000000000000000ffff",
                &[h_fixture.delegation],
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WithdrawalError::DelegationNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_params_snapshot_fails() {
        let fixture = delegation_fixture(false);
        let service = WithdrawalService::new(
            Network::Signet,
            Arc::new(StaticParamsSource::new(vec![])),
            Arc::new(h_signer()),
            Arc::new(failing_broadcaster()),
        );

        let err = service
            .create_withdrawal_tx(
                &fixture.delegation.staking_tx_hash_hex,
                &[fixture.delegation.clone()],
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WithdrawalError::CurrentVersionNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_stake_older_than_all_versions_fails() {
        let fixture = delegation_fixture(false);
        let mut late = params_fixture();
        late.activation_height = fixture.delegation.staking_tx.start_height + 1;

        let service = WithdrawalService::new(
            Network::Signet,
            Arc::new(StaticParamsSource::new(vec![late])),
            Arc::new(h_signer()),
            Arc::new(failing_broadcaster()),
        );

        let err = service
            .create_withdrawal_tx(
                &fixture.delegation.staking_tx_hash_hex,
                &[fixture.delegation.clone()],
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "NO_MATCHING_VERSION");
    }

    #[tokio::test]
    async fn test_signer_failure_is_fatal_and_blocks_broadcast() {
        let mut signer = MockPsbtSigner::new();
        signer
            .expect_sign_psbt()
            .returning(|_| Err(SignerError::Rejected("user cancelled".to_string())));

        let h = harness(false, Arc::new(signer));
        let delegations = vec![h.fixture.delegation.clone()];

        let err = h
            .service
            .sign_withdrawal_tx(
                &h.fixture.delegation.staking_tx_hash_hex,
                &delegations,
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WithdrawalError::Signing(_)));
        assert_eq!(h.broadcasts.load(Ordering::SeqCst), 0);
        // the flow never reached the broadcast checkpoint
        let events = h.events.lock().unwrap().clone();
        assert_eq!(events, vec!["awaiting-signature"]);
    }

    #[tokio::test]
    async fn test_fee_violation_blocks_broadcast() {
        // signer returns a transaction far smaller than the estimate,
        // inflating the effective fee rate past tolerance
        let mut signer = MockPsbtSigner::new();
        signer.expect_sign_psbt().returning(|_| {
            let tiny = Transaction {
                version: Version::TWO,
                lock_time: LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: OutPoint::null(),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                }],
                output: vec![],
            };
            Ok(consensus::serialize(&tiny))
        });

        let h = harness(false, Arc::new(signer));
        let delegations = vec![h.fixture.delegation.clone()];

        let err = h
            .service
            .sign_withdrawal_tx(
                &h.fixture.delegation.staking_tx_hash_hex,
                &delegations,
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WithdrawalError::FeeSafety(_)));
        assert_eq!(h.broadcasts.load(Ordering::SeqCst), 0);
        let events = h.events.lock().unwrap().clone();
        assert_eq!(events, vec!["awaiting-signature"]);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_is_surfaced_unchanged() {
        let fixture = delegation_fixture(false);
        let service = WithdrawalService::new(
            Network::Signet,
            Arc::new(StaticParamsSource::new(vec![params_fixture()])),
            Arc::new(fixture.staker.clone()),
            Arc::new(failing_broadcaster()),
        );

        let err = service
            .sign_withdrawal_tx(
                &fixture.delegation.staking_tx_hash_hex,
                &[fixture.delegation.clone()],
                &destination(),
                FEE_RATE,
            )
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "BROADCAST_FAILED");
    }

    #[test]
    fn test_single_key_signer_round_trip() {
        let signer = SingleKeySigner::generate();
        let restored = SingleKeySigner::from_hex(&signer.secret_hex()).unwrap();
        assert_eq!(signer.public_key(), restored.public_key());
    }

    /// A signer whose key matches nothing; signature bytes are still
    /// structurally valid, which is all the flow inspects.
    fn h_signer() -> SingleKeySigner {
        SingleKeySigner::generate()
    }

    struct FailingBroadcaster;

    #[async_trait]
    impl TxBroadcaster for FailingBroadcaster {
        async fn broadcast(&self, _tx_hex: &str) -> Result<String, BroadcastError> {
            Err(BroadcastError::Rejected("min relay fee not met".to_string()))
        }
    }

    fn failing_broadcaster() -> FailingBroadcaster {
        FailingBroadcaster
    }
}

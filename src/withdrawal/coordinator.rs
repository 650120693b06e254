//! Withdrawal Coordinator
//!
//! Submits the withdrawal to the sidechain and then observes the
//! signatories' side of the protocol: the payout transaction appearing at
//! the destination and confirming to depth. Also exposes the canonical
//! unsigned-transaction construction (with reservation) that
//! signatory-side callers validate against.

use bitcoin::{Network, ScriptBuf, Txid};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::builder::{BuilderError, TxBuilder, UnsignedWithdrawalTx};
use crate::chain::{ChainClient, Utxo};
use crate::sidechain::{SidechainClient, SidechainError};
use crate::signatory::{SignatoryError, SignatorySet};
use crate::storage::{SessionStore, StorageError};
use crate::tracker::{ConfirmationTracker, TrackerError};
use crate::withdrawal::reservation::{ReservationError, ReservationLedger};
use crate::withdrawal::types::{WithdrawalSession, WithdrawalState};

/// Withdrawal coordination errors
#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("sidechain error: {0}")]
    Sidechain(#[from] SidechainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("builder error: {0}")]
    Builder(#[from] BuilderError),

    #[error("signatory error: {0}")]
    Signatory(#[from] SignatoryError),

    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// Policy knobs for the withdrawal flow; values come from configuration
#[derive(Debug, Clone)]
pub struct WithdrawalPolicy {
    /// Confirmations required on the payout
    pub required_depth: u32,
    /// Poll interval for chain queries
    pub poll_interval: Duration,
    /// How long to wait for the signatories to produce the payout.
    /// Expiry is final: threshold failure is operator-resolved, not retried.
    pub signature_timeout: Duration,
    /// How long to wait for the payout to reach depth
    pub confirm_timeout: Duration,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            required_depth: 1,
            poll_interval: Duration::from_secs(10),
            signature_timeout: Duration::from_secs(60 * 60),
            confirm_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Orchestrates withdrawals end to end
pub struct WithdrawalCoordinator {
    network: Network,
    policy: WithdrawalPolicy,
    sidechain: Arc<dyn SidechainClient>,
    store: Arc<dyn SessionStore>,
    builder: TxBuilder,
    tracker: ConfirmationTracker,
    ledger: Arc<ReservationLedger>,
}

impl WithdrawalCoordinator {
    /// Create a coordinator over the given collaborators
    pub fn new(
        network: Network,
        policy: WithdrawalPolicy,
        chain: Arc<dyn ChainClient>,
        sidechain: Arc<dyn SidechainClient>,
        store: Arc<dyn SessionStore>,
        builder: TxBuilder,
        ledger: Arc<ReservationLedger>,
    ) -> Self {
        let tracker = ConfirmationTracker::new(chain, policy.poll_interval);
        Self {
            network,
            policy,
            sidechain,
            store,
            builder,
            tracker,
            ledger,
        }
    }

    /// Submit a withdrawal to the sidechain.
    ///
    /// The sidechain burns the value and emits the signatories' obligation
    /// atomically; a rejection means nothing was burned and no session is
    /// opened.
    pub async fn submit(
        &self,
        dest_address: &str,
        amount: u64,
    ) -> Result<WithdrawalSession, WithdrawalError> {
        let address = self.builder.validate_address(dest_address)?;

        self.sidechain
            .submit_withdrawal(&address.script_pubkey(), amount)
            .await?;

        let session = WithdrawalSession::new(dest_address.to_string(), amount);
        self.store.insert_withdrawal(&session).await?;

        info!(session = %session.id, destination = dest_address, amount, "withdrawal submitted");
        Ok(session)
    }

    /// Reload a persisted session after a restart
    pub async fn resume(&self, session_id: &str) -> Result<WithdrawalSession, WithdrawalError> {
        self.store
            .get_withdrawal(session_id)
            .await?
            .ok_or_else(|| WithdrawalError::UnknownSession(session_id.to_string()))
    }

    /// Drive a session until it reaches a terminal state.
    ///
    /// Session-level failures (signature or confirmation timeout) mark the
    /// session `Failed` and return it; they do not surface as `Err`.
    pub async fn drive(
        &self,
        mut session: WithdrawalSession,
    ) -> Result<WithdrawalSession, WithdrawalError> {
        while !session.is_terminal() {
            match session.state {
                WithdrawalState::Submitted => {
                    session.set_state(WithdrawalState::AwaitingSignatures);
                }
                WithdrawalState::AwaitingSignatures => {
                    self.await_signatures(&mut session).await;
                }
                WithdrawalState::AwaitingBroadcast => {
                    // the payout was observed in the UTXO set, so it is
                    // already past the network's acceptance
                    session.mark_payout_seen();
                }
                WithdrawalState::AwaitingConfirmation => {
                    self.await_depth(&mut session).await;
                }
                WithdrawalState::Completed | WithdrawalState::Failed => unreachable!(),
            }
            self.store.update_withdrawal(&session).await?;
        }

        Ok(session)
    }

    /// Build the canonical unsigned withdrawal, reserving its inputs.
    ///
    /// The selected outpoints are marked in-flight atomically; a conflict
    /// means another withdrawal already claimed one of them, and the caller
    /// must re-select over the remaining reserve UTXOs. Reservations are
    /// released via [`release`] on failure or final consumption.
    ///
    /// [`release`]: WithdrawalCoordinator::release
    pub async fn build_canonical_tx(
        &self,
        reserve_utxos: &[Utxo],
        destination_script: ScriptBuf,
        amount: u64,
        set: &SignatorySet,
    ) -> Result<UnsignedWithdrawalTx, WithdrawalError> {
        let unsigned =
            self.builder
                .build_withdrawal(reserve_utxos, destination_script, amount, set)?;

        self.ledger.reserve(&unsigned.outpoints()).await?;
        Ok(unsigned)
    }

    /// Release a withdrawal's input reservation
    pub async fn release(&self, unsigned: &UnsignedWithdrawalTx) {
        self.ledger.release(&unsigned.outpoints()).await;
    }

    /// The network this coordinator targets
    pub fn network(&self) -> Network {
        self.network
    }

    async fn await_signatures(&self, session: &mut WithdrawalSession) {
        match self
            .tracker
            .await_utxos(&session.destination, 1, self.policy.signature_timeout)
            .await
        {
            Ok(utxos) => {
                let payout = &utxos[0];
                info!(
                    session = %session.id,
                    txid = %payout.txid,
                    "payout transaction observed at destination"
                );
                session.mark_threshold_reached(payout.txid.to_string());
            }
            Err(TrackerError::Timeout(_)) => {
                // threshold failure is governance territory, not retried
                session.mark_failed(
                    "signatories did not produce a payout before the timeout".into(),
                );
            }
            Err(TrackerError::Chain(e)) => {
                session.mark_failed(format!("chain access failed: {}", e));
            }
        }
    }

    async fn await_depth(&self, session: &mut WithdrawalSession) {
        let Some(txid_str) = session.payout_txid.as_deref() else {
            session.mark_failed("confirmation state without an observed payout".into());
            return;
        };
        let Ok(txid) = Txid::from_str(txid_str) else {
            session.mark_failed(format!("stored txid is malformed: {}", txid_str));
            return;
        };

        match self
            .tracker
            .await_confirmation(&txid, self.policy.required_depth, self.policy.confirm_timeout)
            .await
        {
            Ok(state) => {
                session.mark_completed(state.confirmations);
                info!(session = %session.id, confirmations = state.confirmations, "withdrawal completed");
            }
            Err(TrackerError::Timeout(_)) => {
                session.mark_failed("payout did not confirm before the timeout".into());
            }
            Err(TrackerError::Chain(e)) => {
                session.mark_failed(format!("chain access failed: {}", e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FeePolicy;
    use crate::chain::{MockChainClient, TxStatus};
    use crate::keys::DepositKey;
    use crate::sidechain::MockSidechainClient;
    use crate::storage::MemorySessionStore;
    use std::collections::HashMap;

    const DEST: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn fast_policy() -> WithdrawalPolicy {
        WithdrawalPolicy {
            required_depth: 1,
            poll_interval: Duration::from_millis(5),
            signature_timeout: Duration::from_millis(50),
            confirm_timeout: Duration::from_millis(200),
        }
    }

    fn test_set() -> SignatorySet {
        let mut validators = HashMap::new();
        validators.insert(DepositKey::generate().public_key(), 60);
        validators.insert(DepositKey::generate().public_key(), 40);
        SignatorySet::from_validators(&validators).unwrap()
    }

    fn accepting_sidechain() -> MockSidechainClient {
        let mut sidechain = MockSidechainClient::new();
        sidechain
            .expect_submit_withdrawal()
            .returning(|_, _| Ok(()));
        sidechain
    }

    fn coordinator(
        chain: MockChainClient,
        sidechain: MockSidechainClient,
    ) -> WithdrawalCoordinator {
        WithdrawalCoordinator::new(
            Network::Testnet,
            fast_policy(),
            Arc::new(chain),
            Arc::new(sidechain),
            Arc::new(MemorySessionStore::new()),
            TxBuilder::new_testnet().with_fee_policy(FeePolicy::Flat(1_000)),
            Arc::new(ReservationLedger::new()),
        )
    }

    fn payout_utxo() -> Utxo {
        Utxo {
            txid: Txid::from_str(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .unwrap(),
            vout: 0,
            value: 5_000_000,
            script_pubkey: ScriptBuf::new(),
            block_height: Some(100),
        }
    }

    #[tokio::test]
    async fn test_full_withdrawal_flow_completes() {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|_| Ok(vec![payout_utxo()]));
        chain.expect_tx_status().returning(|_| {
            Ok(TxStatus {
                confirmed: true,
                block_height: Some(100),
            })
        });
        chain.expect_tip_height().returning(|| Ok(100));

        let coordinator = coordinator(chain, accepting_sidechain());
        let session = coordinator.submit(DEST, 5_000_000).await.unwrap();
        assert_eq!(session.state, WithdrawalState::Submitted);

        let session = coordinator.drive(session).await.unwrap();
        assert_eq!(session.state, WithdrawalState::Completed);
        assert!(session.payout_txid.is_some());
    }

    #[tokio::test]
    async fn test_sidechain_rejection_opens_no_session() {
        let mut sidechain = MockSidechainClient::new();
        sidechain
            .expect_submit_withdrawal()
            .returning(|_, _| Err(SidechainError::Rejected("insufficient balance".into())));

        let coordinator = coordinator(MockChainClient::new(), sidechain);
        let result = coordinator.submit(DEST, 5_000_000).await;

        assert!(matches!(result, Err(WithdrawalError::Sidechain(_))));
    }

    #[tokio::test]
    async fn test_invalid_destination_rejected_before_submission() {
        let coordinator = coordinator(MockChainClient::new(), MockSidechainClient::new());
        let result = coordinator.submit("not-an-address", 5_000_000).await;
        assert!(matches!(result, Err(WithdrawalError::Builder(_))));
    }

    #[tokio::test]
    async fn test_signature_timeout_fails_session() {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|_| Ok(vec![]));

        let coordinator = coordinator(chain, accepting_sidechain());
        let session = coordinator.submit(DEST, 5_000_000).await.unwrap();
        let session = coordinator.drive(session).await.unwrap();

        assert_eq!(session.state, WithdrawalState::Failed);
        assert!(session.error.unwrap().contains("signatories"));
    }

    #[tokio::test]
    async fn test_canonical_tx_reserves_inputs() {
        let set = test_set();
        let coordinator = coordinator(MockChainClient::new(), MockSidechainClient::new());

        let utxos = vec![Utxo {
            txid: Txid::from_str(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .unwrap(),
            vout: 0,
            value: 10_000_000,
            script_pubkey: set.output_script(),
            block_height: Some(100),
        }];

        let dest = DepositKey::generate().script_pubkey();
        let unsigned = coordinator
            .build_canonical_tx(&utxos, dest.clone(), 4_000_000, &set)
            .await
            .unwrap();

        // a second withdrawal over the same reserve UTXOs must not overlap
        let conflict = coordinator
            .build_canonical_tx(&utxos, dest, 4_000_000, &set)
            .await;
        assert!(matches!(
            conflict,
            Err(WithdrawalError::Reservation(ReservationError::Conflict(_)))
        ));

        // released inputs become selectable again
        coordinator.release(&unsigned).await;
        let dest2 = DepositKey::generate().script_pubkey();
        assert!(coordinator
            .build_canonical_tx(&utxos, dest2, 4_000_000, &set)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let coordinator = coordinator(MockChainClient::new(), MockSidechainClient::new());
        let result = coordinator.resume("wd_missing").await;
        assert!(matches!(result, Err(WithdrawalError::UnknownSession(_))));
    }
}

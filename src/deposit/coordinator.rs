//! Deposit Coordinator
//!
//! Owns the deposit state machine. Every transition is persisted, so a
//! restarted process can pick a session back up with [`resume`]. A session
//! that fails is recorded as `Failed` and returned normally; only
//! infrastructure errors (storage, malformed snapshots) surface as `Err`.
//!
//! [`resume`]: DepositCoordinator::resume

use bitcoin::{Network, Txid};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::builder::TxBuilder;
use crate::chain::{ChainClient, ChainError};
use crate::deposit::types::{DepositSession, DepositState};
use crate::keys::{DepositKey, KeyError};
use crate::sidechain::{SidechainClient, SidechainError};
use crate::signatory::{SignatoryError, SignatorySet};
use crate::storage::{SessionStore, StorageError};
use crate::tracker::{ConfirmationTracker, TrackerError};
use crate::wallet::WalletError;

/// Deposit coordination errors
#[derive(Debug, Error)]
pub enum DepositError {
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("signatory error: {0}")]
    Signatory(#[from] SignatoryError),

    #[error("sidechain error: {0}")]
    Sidechain(#[from] SidechainError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid recipient: {0}")]
    Recipient(#[from] WalletError),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session {0} already reached state {1}")]
    SessionTerminal(String, DepositState),
}

/// Policy knobs for the deposit flow; values come from configuration
#[derive(Debug, Clone)]
pub struct DepositPolicy {
    /// Confirmations required on the forward before crediting
    pub required_depth: u32,
    /// Poll interval for chain queries
    pub poll_interval: Duration,
    /// How long to wait for the user's funds to arrive
    pub funds_timeout: Duration,
    /// How long to wait for the forward to reach depth
    pub confirm_timeout: Duration,
    /// Broadcast attempts before giving up
    pub broadcast_retries: u32,
    /// Base backoff between broadcast attempts (doubles per retry)
    pub broadcast_backoff: Duration,
}

impl Default for DepositPolicy {
    fn default() -> Self {
        Self {
            required_depth: 1,
            poll_interval: Duration::from_secs(10),
            funds_timeout: Duration::from_secs(24 * 60 * 60),
            confirm_timeout: Duration::from_secs(2 * 60 * 60),
            broadcast_retries: 3,
            broadcast_backoff: Duration::from_secs(5),
        }
    }
}

/// An open deposit session plus the in-memory material driving it
pub struct DepositHandle {
    /// The persisted session record
    pub session: DepositSession,
    key: DepositKey,
    set: SignatorySet,
    commitment: [u8; 20],
}

impl DepositHandle {
    /// The address the user must fund
    pub fn address(&self) -> &str {
        &self.session.deposit_address
    }

    /// Session ID for later resume
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

/// Orchestrates deposits end to end
pub struct DepositCoordinator {
    network: Network,
    policy: DepositPolicy,
    chain: Arc<dyn ChainClient>,
    sidechain: Arc<dyn SidechainClient>,
    store: Arc<dyn SessionStore>,
    builder: TxBuilder,
    tracker: ConfirmationTracker,
}

impl DepositCoordinator {
    /// Create a coordinator over the given collaborators
    pub fn new(
        network: Network,
        policy: DepositPolicy,
        chain: Arc<dyn ChainClient>,
        sidechain: Arc<dyn SidechainClient>,
        store: Arc<dyn SessionStore>,
        builder: TxBuilder,
    ) -> Self {
        let tracker = ConfirmationTracker::new(chain.clone(), policy.poll_interval);
        Self {
            network,
            policy,
            chain,
            sidechain,
            store,
            builder,
            tracker,
        }
    }

    /// Open a new deposit session for a sidechain recipient.
    ///
    /// Captures a fresh signatory snapshot (never reuses a stale reserve
    /// script), derives a single-use address and persists the session.
    pub async fn begin(&self, recipient: &str) -> Result<DepositHandle, DepositError> {
        let commitment = crate::wallet::decode_account(recipient)?;
        let set = self.fresh_signatory_set().await?;

        let key = DepositKey::generate();
        let address = key.address(self.network)?;

        let session = DepositSession::new(
            address.to_string(),
            key.secret_hex(),
            recipient.to_string(),
        );
        self.store.insert_deposit(&session).await?;

        info!(
            session = %session.id,
            address = %address,
            signatories = set.len(),
            "deposit session opened"
        );

        Ok(DepositHandle {
            session,
            key,
            set,
            commitment,
        })
    }

    /// Reload a persisted session after a restart.
    ///
    /// The signatory snapshot is re-captured; the ephemeral key comes back
    /// from the stored secret.
    pub async fn resume(&self, session_id: &str) -> Result<DepositHandle, DepositError> {
        let session = self
            .store
            .get_deposit(session_id)
            .await?
            .ok_or_else(|| DepositError::UnknownSession(session_id.to_string()))?;

        if session.is_terminal() {
            return Err(DepositError::SessionTerminal(
                session.id.clone(),
                session.state,
            ));
        }

        let key = DepositKey::from_secret_hex(&session.deposit_secret)?;
        let commitment = crate::wallet::decode_account(&session.recipient)?;
        let set = self.fresh_signatory_set().await?;

        info!(session = %session.id, state = %session.state, "deposit session resumed");

        Ok(DepositHandle {
            session,
            key,
            set,
            commitment,
        })
    }

    /// Drive a session until it reaches a terminal state.
    ///
    /// Session-level failures (timeout, insufficient funds, exhausted
    /// broadcast retries) mark the session `Failed` and return it; they do
    /// not surface as `Err`.
    pub async fn drive(&self, handle: DepositHandle) -> Result<DepositSession, DepositError> {
        let DepositHandle {
            mut session,
            key,
            set,
            commitment,
        } = handle;

        while !session.is_terminal() {
            match session.state {
                DepositState::AwaitingFunds => {
                    self.await_funds(&mut session).await?;
                }
                DepositState::BuildingTransaction => {
                    self.build_forward(&mut session, &key, &set, &commitment)
                        .await?;
                }
                DepositState::Broadcasting => {
                    self.broadcast_forward(&mut session).await?;
                }
                DepositState::AwaitingConfirmation => {
                    self.await_depth(&mut session).await?;
                }
                DepositState::Completed | DepositState::Failed => unreachable!(),
            }
            self.store.update_deposit(&session).await?;
        }

        Ok(session)
    }

    async fn fresh_signatory_set(&self) -> Result<SignatorySet, DepositError> {
        let info = self.sidechain.pegging_info().await?;
        let powers = info.signatory_powers()?;
        Ok(SignatorySet::from_validators(&powers)?)
    }

    async fn await_funds(&self, session: &mut DepositSession) -> Result<(), DepositError> {
        match self
            .tracker
            .await_utxos(&session.deposit_address, 1, self.policy.funds_timeout)
            .await
        {
            Ok(utxos) => {
                let total: u64 = utxos.iter().map(|u| u.value).sum();
                session.mark_building(total);
            }
            Err(TrackerError::Timeout(_)) => {
                session.mark_failed("no deposit arrived before the timeout".into());
            }
            Err(TrackerError::Chain(e)) => {
                session.mark_failed(format!("chain access failed: {}", e));
            }
        }
        Ok(())
    }

    async fn build_forward(
        &self,
        session: &mut DepositSession,
        key: &DepositKey,
        set: &SignatorySet,
        commitment: &[u8; 20],
    ) -> Result<(), DepositError> {
        let utxos = match self.chain.utxos(&session.deposit_address).await {
            Ok(utxos) => utxos,
            Err(e) => {
                session.mark_failed(format!("UTXO refresh failed: {}", e));
                return Ok(());
            }
        };

        match self.builder.build_deposit_forward(key, set, commitment, &utxos) {
            Ok(forward) => {
                info!(
                    session = %session.id,
                    txid = %forward.txid(),
                    value = forward.forward_value,
                    fee = forward.fee,
                    "forward transaction built"
                );
                session.mark_broadcasting(forward.txid().to_string(), forward.serialize_hex());
            }
            // a build failure is final: the deposit amount is fixed by the
            // user's transaction, retrying cannot change the outcome
            Err(e) => {
                session.mark_failed(e.to_string());
            }
        }
        Ok(())
    }

    async fn broadcast_forward(&self, session: &mut DepositSession) -> Result<(), DepositError> {
        let Some(tx_hex) = session.forward_tx.clone() else {
            session.mark_failed("broadcasting state without a built transaction".into());
            return Ok(());
        };

        let mut attempt = 0u32;
        loop {
            match self.chain.broadcast(&tx_hex).await {
                Ok(txid) => {
                    info!(session = %session.id, %txid, "forward broadcast accepted");
                    session.mark_confirming();
                    return Ok(());
                }
                Err(ChainError::BroadcastRejected(msg)) if attempt < self.policy.broadcast_retries => {
                    attempt += 1;
                    let backoff = self.policy.broadcast_backoff * 2u32.pow(attempt - 1);
                    warn!(
                        session = %session.id,
                        attempt,
                        error = %msg,
                        "broadcast rejected, backing off"
                    );
                    sleep(backoff).await;
                }
                Err(e) if e.is_transient() && attempt < self.policy.broadcast_retries => {
                    attempt += 1;
                    let backoff = self.policy.broadcast_backoff * 2u32.pow(attempt - 1);
                    warn!(session = %session.id, attempt, error = %e, "broadcast failed, backing off");
                    sleep(backoff).await;
                }
                Err(e) => {
                    session.mark_failed(format!("broadcast failed: {}", e));
                    return Ok(());
                }
            }
        }
    }

    async fn await_depth(&self, session: &mut DepositSession) -> Result<(), DepositError> {
        let Some(txid_str) = session.forward_txid.as_deref() else {
            session.mark_failed("confirmation state without a broadcast txid".into());
            return Ok(());
        };
        let Ok(txid) = Txid::from_str(txid_str) else {
            session.mark_failed(format!("stored txid is malformed: {}", txid_str));
            return Ok(());
        };

        match self
            .tracker
            .await_confirmation(&txid, self.policy.required_depth, self.policy.confirm_timeout)
            .await
        {
            Ok(state) => {
                session.mark_completed(state.confirmations);
                info!(session = %session.id, confirmations = state.confirmations, "deposit completed");
            }
            Err(TrackerError::Timeout(_)) => {
                session.mark_failed("forward did not confirm before the timeout".into());
            }
            Err(TrackerError::Chain(e)) => {
                session.mark_failed(format!("chain access failed: {}", e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FeePolicy;
    use crate::chain::{MockChainClient, TxStatus, Utxo};
    use crate::sidechain::{MockSidechainClient, PeggingInfo};
    use crate::storage::MemorySessionStore;
    use crate::wallet::account_address;

    fn fast_policy() -> DepositPolicy {
        DepositPolicy {
            required_depth: 1,
            poll_interval: Duration::from_millis(5),
            funds_timeout: Duration::from_millis(50),
            confirm_timeout: Duration::from_millis(200),
            broadcast_retries: 2,
            broadcast_backoff: Duration::from_millis(5),
        }
    }

    fn mock_sidechain() -> MockSidechainClient {
        let mut sidechain = MockSidechainClient::new();
        sidechain.expect_pegging_info().returning(|| {
            let mut info = PeggingInfo::default();
            for (i, power) in [60u64, 40].into_iter().enumerate() {
                let key = DepositKey::generate().public_key();
                info.validators.insert(format!("val-{}", i), power);
                info.signatory_keys
                    .insert(format!("val-{}", i), key.to_string());
            }
            Ok(info)
        });
        sidechain
    }

    fn recipient() -> String {
        account_address(&DepositKey::generate().public_key())
    }

    fn coordinator(chain: MockChainClient) -> DepositCoordinator {
        DepositCoordinator::new(
            Network::Testnet,
            fast_policy(),
            Arc::new(chain),
            Arc::new(mock_sidechain()),
            Arc::new(MemorySessionStore::new()),
            TxBuilder::new_testnet().with_fee_policy(FeePolicy::Flat(1_000)),
        )
    }

    fn funded_chain() -> MockChainClient {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|address| {
            // funds appear at whatever address the session derived
            let parsed = bitcoin::Address::from_str(address).unwrap().assume_checked();
            Ok(vec![Utxo {
                txid: Txid::from_str(
                    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                )
                .unwrap(),
                vout: 0,
                value: 10_000_000,
                script_pubkey: parsed.script_pubkey(),
                block_height: Some(100),
            }])
        });
        chain
            .expect_broadcast()
            .returning(|tx_hex| {
                let tx: bitcoin::Transaction =
                    bitcoin::consensus::encode::deserialize(&hex::decode(tx_hex).unwrap()).unwrap();
                Ok(tx.compute_txid())
            });
        chain.expect_tx_status().returning(|_| {
            Ok(TxStatus {
                confirmed: true,
                block_height: Some(101),
            })
        });
        chain.expect_tip_height().returning(|| Ok(101));
        chain
    }

    #[tokio::test]
    async fn test_full_deposit_flow_completes() {
        let coordinator = coordinator(funded_chain());

        let handle = coordinator.begin(&recipient()).await.unwrap();
        assert!(handle.address().starts_with('m') || handle.address().starts_with('n'));

        let session = coordinator.drive(handle).await.unwrap();
        assert_eq!(session.state, DepositState::Completed);
        assert_eq!(session.detected_sats, 10_000_000);
        assert!(session.forward_txid.is_some());
        assert_eq!(session.confirmations, 1);
    }

    #[tokio::test]
    async fn test_no_funds_times_out_to_failed() {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|_| Ok(vec![]));

        let coordinator = coordinator(chain);
        let handle = coordinator.begin(&recipient()).await.unwrap();
        let session = coordinator.drive(handle).await.unwrap();

        assert_eq!(session.state, DepositState::Failed);
        assert!(session.error.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_rejection_exhausts_retries() {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|address| {
            let parsed = bitcoin::Address::from_str(address).unwrap().assume_checked();
            Ok(vec![Utxo {
                txid: Txid::from_str(
                    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                )
                .unwrap(),
                vout: 0,
                value: 10_000_000,
                script_pubkey: parsed.script_pubkey(),
                block_height: Some(100),
            }])
        });
        chain
            .expect_broadcast()
            .returning(|_| Err(ChainError::BroadcastRejected("txn-mempool-conflict".into())));

        let coordinator = coordinator(chain);
        let handle = coordinator.begin(&recipient()).await.unwrap();
        let session = coordinator.drive(handle).await.unwrap();

        assert_eq!(session.state, DepositState::Failed);
        assert!(session.error.unwrap().contains("broadcast failed"));
    }

    #[tokio::test]
    async fn test_unconfirmed_forward_times_out_to_failed() {
        let mut chain = MockChainClient::new();
        chain.expect_utxos().returning(|address| {
            let parsed = bitcoin::Address::from_str(address).unwrap().assume_checked();
            Ok(vec![Utxo {
                txid: Txid::from_str(
                    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
                )
                .unwrap(),
                vout: 0,
                value: 10_000_000,
                script_pubkey: parsed.script_pubkey(),
                block_height: Some(100),
            }])
        });
        chain.expect_broadcast().returning(|tx_hex| {
            let tx: bitcoin::Transaction =
                bitcoin::consensus::encode::deserialize(&hex::decode(tx_hex).unwrap()).unwrap();
            Ok(tx.compute_txid())
        });
        // the forward never makes it into a block
        chain.expect_tx_status().returning(|_| {
            Ok(TxStatus {
                confirmed: false,
                block_height: None,
            })
        });

        let coordinator = coordinator(chain);
        let handle = coordinator.begin(&recipient()).await.unwrap();
        let session = coordinator.drive(handle).await.unwrap();

        assert_eq!(session.state, DepositState::Failed);
        assert!(session.error.unwrap().contains("confirm"));
    }

    #[tokio::test]
    async fn test_resume_restores_key_and_state() {
        let store = Arc::new(MemorySessionStore::new());
        let chain = Arc::new(funded_chain());
        let coordinator = DepositCoordinator::new(
            Network::Testnet,
            fast_policy(),
            chain,
            Arc::new(mock_sidechain()),
            store.clone(),
            TxBuilder::new_testnet().with_fee_policy(FeePolicy::Flat(1_000)),
        );

        let handle = coordinator.begin(&recipient()).await.unwrap();
        let id = handle.session_id().to_string();
        let address = handle.address().to_string();
        drop(handle);

        // a restarted process resumes from storage
        let resumed = coordinator.resume(&id).await.unwrap();
        assert_eq!(resumed.address(), address);
        assert_eq!(resumed.session.state, DepositState::AwaitingFunds);

        let session = coordinator.drive(resumed).await.unwrap();
        assert_eq!(session.state, DepositState::Completed);
    }

    #[tokio::test]
    async fn test_resume_unknown_session() {
        let coordinator = coordinator(MockChainClient::new());
        let result = coordinator.resume("dep_missing").await;
        assert!(matches!(result, Err(DepositError::UnknownSession(_))));
    }
}

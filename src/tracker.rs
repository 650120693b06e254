//! Confirmation Tracker
//!
//! Long-lived, suspendable waits over the Bitcoin chain: funds arriving at
//! an address, and a transaction reaching its required confirmation depth.
//! Polls cooperatively via timer-driven sleeps (never a busy loop), retries
//! transient chain errors inside the wait window, and treats a reorg as a
//! depth reset rather than an error.

use bitcoin::Txid;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::chain::{ChainClient, ChainError, Utxo};

/// Tracker errors
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Observed confirmation state of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationState {
    /// The transaction being tracked
    pub txid: Txid,
    /// Including block height, if any
    pub block_height: Option<u64>,
    /// Blocks built atop the including block, plus one
    pub confirmations: u32,
}

/// Polls chain state for UTXO arrival and confirmation depth
#[derive(Clone)]
pub struct ConfirmationTracker {
    chain: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl ConfirmationTracker {
    /// Create a tracker polling at the given interval
    pub fn new(chain: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            chain,
            poll_interval,
        }
    }

    /// Wait until at least `min_count` UTXOs are visible at `address`.
    ///
    /// Transient chain errors are logged and retried until the deadline;
    /// expiry surfaces as [`TrackerError::Timeout`]. Cancelling the wait
    /// (dropping the future) leaves no partial state.
    pub async fn await_utxos(
        &self,
        address: &str,
        min_count: usize,
        timeout: Duration,
    ) -> Result<Vec<Utxo>, TrackerError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.chain.utxos(address).await {
                Ok(utxos) if utxos.len() >= min_count => {
                    info!(address, count = utxos.len(), "funds detected");
                    return Ok(utxos);
                }
                Ok(utxos) => {
                    debug!(address, count = utxos.len(), needed = min_count, "still waiting");
                }
                Err(e) if e.is_transient() => {
                    warn!(address, error = %e, "transient chain error while polling");
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(TrackerError::Timeout(timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Wait until `txid` has `required_depth` confirmations.
    ///
    /// A previously-observed inclusion that disappears (chain
    /// reorganization) resets the observed depth and polling continues;
    /// false success is never reported.
    pub async fn await_confirmation(
        &self,
        txid: &Txid,
        required_depth: u32,
        timeout: Duration,
    ) -> Result<ConfirmationState, TrackerError> {
        let deadline = Instant::now() + timeout;
        let mut last_seen_height: Option<u64> = None;

        loop {
            match self.confirmations(txid).await {
                Ok(state) => {
                    if last_seen_height.is_some() && state.block_height.is_none() {
                        warn!(%txid, "reorg detected, transaction no longer included");
                        last_seen_height = None;
                    } else if state.block_height.is_some() {
                        last_seen_height = state.block_height;
                    }

                    if state.confirmations >= required_depth {
                        info!(%txid, confirmations = state.confirmations, "confirmation depth reached");
                        return Ok(state);
                    }
                    debug!(%txid, confirmations = state.confirmations, required = required_depth, "awaiting depth");
                }
                Err(e) if e.is_transient() => {
                    warn!(%txid, error = %e, "transient chain error while polling");
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(TrackerError::Timeout(timeout));
            }
            sleep(self.poll_interval).await;
        }
    }

    /// One-shot confirmation count for a transaction
    async fn confirmations(&self, txid: &Txid) -> Result<ConfirmationState, ChainError> {
        let status = self.chain.tx_status(txid).await?;

        if !status.confirmed {
            return Ok(ConfirmationState {
                txid: *txid,
                block_height: None,
                confirmations: 0,
            });
        }

        let tip = self.chain.tip_height().await?;
        let height = status.block_height.unwrap_or(tip);
        let confirmations = (tip.saturating_sub(height) + 1) as u32;

        Ok(ConfirmationState {
            txid: *txid,
            block_height: status.block_height,
            confirmations,
        })
    }
}

//! Reserve UTXO Reservation Ledger
//!
//! Two concurrent withdrawals must never select overlapping reserve UTXOs
//! as inputs. The ledger is the single serialization point: outpoints are
//! reserved all-or-nothing when a withdrawal is built, and released when
//! the session fails or the inputs are finally consumed.

use bitcoin::OutPoint;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::Mutex;

/// Reservation errors
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("outpoint already reserved by another withdrawal: {0}")]
    Conflict(OutPoint),
}

/// In-flight reserve outpoints, serialized behind one lock
#[derive(Debug, Default)]
pub struct ReservationLedger {
    inflight: Mutex<HashSet<OutPoint>>,
}

impl ReservationLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a set of outpoints atomically.
    ///
    /// Either every outpoint is marked in-flight, or none are and the
    /// first conflicting outpoint is reported.
    pub async fn reserve(&self, outpoints: &[OutPoint]) -> Result<(), ReservationError> {
        let mut inflight = self.inflight.lock().await;

        for outpoint in outpoints {
            if inflight.contains(outpoint) {
                return Err(ReservationError::Conflict(*outpoint));
            }
        }

        for outpoint in outpoints {
            inflight.insert(*outpoint);
        }
        Ok(())
    }

    /// Release outpoints on failure or final consumption
    pub async fn release(&self, outpoints: &[OutPoint]) {
        let mut inflight = self.inflight.lock().await;
        for outpoint in outpoints {
            inflight.remove(outpoint);
        }
    }

    /// Whether an outpoint is currently reserved
    pub async fn is_reserved(&self, outpoint: &OutPoint) -> bool {
        self.inflight.lock().await.contains(outpoint)
    }

    /// Number of in-flight outpoints
    pub async fn len(&self) -> usize {
        self.inflight.lock().await.len()
    }

    /// Whether the ledger is empty
    pub async fn is_empty(&self) -> bool {
        self.inflight.lock().await.is_empty()
    }
}

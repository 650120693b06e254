//! Bitcoin Chain Access Seam
//!
//! The peg core treats the Bitcoin network as an opaque, possibly slow,
//! possibly transiently failing service: UTXO lookup by address, broadcast,
//! and confirmation queries. Implementations live behind `ChainClient`;
//! production uses the Esplora REST client, tests use a mock.

use async_trait::async_trait;
use bitcoin::{OutPoint, ScriptBuf, Txid};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Chain access errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain request failed: {0}")]
    Request(String),

    #[error("transaction not found: {0}")]
    TxNotFound(String),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ChainError {
    /// Transient failures worth retrying within a poll window
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Request(_) | ChainError::TxNotFound(_))
    }
}

/// An unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Transaction that created this output
    pub txid: Txid,
    /// Output index
    pub vout: u32,
    /// Value in satoshis
    pub value: u64,
    /// The controlling output script
    pub script_pubkey: ScriptBuf,
    /// Block height (None if unconfirmed)
    pub block_height: Option<u64>,
}

impl Utxo {
    /// The outpoint consumed when this UTXO is spent
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// Inclusion status of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxStatus {
    /// Whether the transaction is in a block
    pub confirmed: bool,
    /// Including block height, if confirmed
    pub block_height: Option<u64>,
}

/// Opaque Bitcoin chain access used by the trackers and coordinators
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Unspent outputs currently visible at an address
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// Inclusion status for a transaction
    async fn tx_status(&self, txid: &Txid) -> Result<TxStatus, ChainError>;

    /// Current chain tip height
    async fn tip_height(&self) -> Result<u64, ChainError>;

    /// Broadcast a raw transaction, returning its txid
    async fn broadcast(&self, tx_hex: &str) -> Result<Txid, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_utxo_outpoint() {
        let txid = Txid::from_str(
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
        )
        .unwrap();

        let utxo = Utxo {
            txid,
            vout: 1,
            value: 50_000,
            script_pubkey: ScriptBuf::new(),
            block_height: None,
        };

        assert_eq!(utxo.outpoint(), OutPoint { txid, vout: 1 });
    }

    #[test]
    fn test_transient_classification() {
        assert!(ChainError::Request("timeout".into()).is_transient());
        assert!(ChainError::TxNotFound("abc".into()).is_transient());
        assert!(!ChainError::BroadcastRejected("dust".into()).is_transient());
    }
}

//! pegbtc - Bitcoin Peg Client
//!
//! The client-observable half of a two-way Bitcoin peg: value moves into a
//! reserve custodied by the sidechain's validator set, and back out through
//! cooperatively signed withdrawals.
//!
//! ## Flows
//!
//! - **Deposit**: derive a single-use address from an ephemeral key, wait
//!   for the user's funds, forward them into the weighted-multisig reserve
//!   (tagged with the recipient's sidechain account), and wait for
//!   confirmation. The sidechain credits the recipient once it sees the
//!   confirmed forward.
//! - **Withdrawal**: submit to the sidechain (which burns the value and
//!   obligates the signatories), then watch the destination for the
//!   cooperatively signed payout and its confirmation.
//!
//! The sidechain itself, the signatories' signing processes, and the
//! Bitcoin network are external collaborators behind trait seams.

pub mod builder;
pub mod chain;
pub mod common;
pub mod config;
pub mod deposit;
pub mod esplora;
pub mod keys;
pub mod logging;
pub mod sidechain;
pub mod signatory;
pub mod storage;
pub mod tracker;
pub mod wallet;
pub mod withdrawal;

// Re-exports: root error
pub use common::{PegError, Result};

// Re-exports: core protocol types
pub use builder::{DepositForward, FeePolicy, TxBuilder, UnsignedWithdrawalTx};
pub use chain::{ChainClient, Utxo};
pub use keys::DepositKey;
pub use signatory::{Signatory, SignatorySet};
pub use tracker::{ConfirmationState, ConfirmationTracker};

// Re-exports: coordinators
pub use deposit::{DepositCoordinator, DepositSession, DepositState};
pub use withdrawal::{
    ReservationLedger, WithdrawalCoordinator, WithdrawalSession, WithdrawalState,
};

// Re-exports: collaborator seams and implementations
pub use esplora::EsploraClient;
pub use sidechain::{HttpSidechainClient, PeggingInfo, SidechainClient};
pub use storage::{MemorySessionStore, SessionStore, SqliteSessionStore};
pub use wallet::{FileKeyProvider, KeyProvider};

/// Satoshi conversion helpers.
///
/// Transaction construction is integer-satoshi only; these conversions are
/// for display and never feed back into building.
pub mod units {
    pub const SATS_PER_BTC: u64 = 100_000_000;

    /// Convert satoshis to BTC for display
    pub fn sats_to_btc(sats: u64) -> f64 {
        sats as f64 / SATS_PER_BTC as f64
    }

    /// Format an amount for the CLI
    pub fn format_sats(sats: u64) -> String {
        format!("{} sats ({:.8} BTC)", sats, sats_to_btc(sats))
    }

}

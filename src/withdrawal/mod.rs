//! Withdrawal Flow
//!
//! Drives a withdrawal from sidechain submission to Bitcoin confirmation:
//!
//! ```text
//! Submitted -> AwaitingSignatures -> AwaitingBroadcast
//!           -> AwaitingConfirmation -> Completed
//! ```
//!
//! `Failed` is reachable throughout. The sidechain burns the withdrawn
//! value atomically with emitting the signatories' obligation; this client
//! observes the signatories' work through the payout transaction appearing
//! at the destination. If the threshold is never reached within the policy
//! timeout the session fails and resolution is an operator concern.
//!
//! Reserve UTXO selection is safety-critical under concurrency: the
//! [`ReservationLedger`] serializes in-flight outpoints so two withdrawals
//! can never spend overlapping inputs.

pub mod coordinator;
pub mod reservation;
pub mod types;

pub use coordinator::{WithdrawalCoordinator, WithdrawalError, WithdrawalPolicy};
pub use reservation::{ReservationError, ReservationLedger};
pub use types::{WithdrawalSession, WithdrawalState};

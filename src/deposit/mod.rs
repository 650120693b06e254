//! Deposit Flow
//!
//! Drives a single deposit from derived address to sidechain credit:
//!
//! ```text
//! AwaitingFunds -> BuildingTransaction -> Broadcasting
//!               -> AwaitingConfirmation -> Completed
//! ```
//!
//! `Failed` is reachable from every step. Each session owns its ephemeral
//! key and shares nothing mutable with other sessions; progress is
//! persisted after every transition so a restarted process can resume.

pub mod coordinator;
pub mod types;

pub use coordinator::{DepositCoordinator, DepositError, DepositHandle};
pub use types::{DepositSession, DepositState};

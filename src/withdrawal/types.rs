//! Withdrawal Session Types

use serde::{Deserialize, Serialize};

/// Where a withdrawal is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalState {
    /// Accepted by the sidechain; value burned, obligation emitted
    Submitted,
    /// Waiting for signatories to reach the weighted threshold
    AwaitingSignatures,
    /// Threshold reached; payout entering the Bitcoin network
    AwaitingBroadcast,
    /// Payout seen; waiting for required depth
    AwaitingConfirmation,
    /// Payout confirmed
    Completed,
    /// Unrecoverable error
    Failed,
}

impl Default for WithdrawalState {
    fn default() -> Self {
        Self::Submitted
    }
}

impl std::fmt::Display for WithdrawalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "submitted"),
            Self::AwaitingSignatures => write!(f, "awaiting_signatures"),
            Self::AwaitingBroadcast => write!(f, "awaiting_broadcast"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A withdrawal session record, persisted after every state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalSession {
    /// Unique session ID
    pub id: String,
    /// Destination Bitcoin address
    pub destination: String,
    /// Amount withdrawn, in satoshis
    pub amount_sats: u64,
    /// Current state
    pub state: WithdrawalState,
    /// The signatories' payout transaction, once observed
    pub payout_txid: Option<String>,
    /// Confirmations observed on the payout
    pub confirmations: u32,
    /// Timestamp when the session was opened
    pub created_at: u64,
    /// Timestamp of last transition
    pub updated_at: u64,
    /// Error message if failed
    pub error: Option<String>,
}

impl WithdrawalSession {
    /// Open a new session
    pub fn new(destination: String, amount_sats: u64) -> Self {
        let now = now_secs();
        let id = format!("wd_{}_{:08x}", now, rand::random::<u32>());

        Self {
            id,
            destination,
            amount_sats,
            state: WithdrawalState::Submitted,
            payout_txid: None,
            confirmations: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Whether the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            WithdrawalState::Completed | WithdrawalState::Failed
        )
    }

    /// Move to a new state
    pub fn set_state(&mut self, state: WithdrawalState) {
        self.state = state;
        self.touch();
    }

    /// Signature threshold reached: the payout has been observed
    pub fn mark_threshold_reached(&mut self, payout_txid: String) {
        self.payout_txid = Some(payout_txid);
        self.state = WithdrawalState::AwaitingBroadcast;
        self.touch();
    }

    /// Payout entering the network; await depth
    pub fn mark_payout_seen(&mut self) {
        self.state = WithdrawalState::AwaitingConfirmation;
        self.touch();
    }

    /// Required depth reached
    pub fn mark_completed(&mut self, confirmations: u32) {
        self.confirmations = confirmations;
        self.state = WithdrawalState::Completed;
        self.touch();
    }

    /// Unrecoverable failure
    pub fn mark_failed(&mut self, error: String) {
        self.error = Some(error);
        self.state = WithdrawalState::Failed;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

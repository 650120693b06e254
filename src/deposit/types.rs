//! Deposit Session Types

use serde::{Deserialize, Serialize};

/// Where a deposit is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositState {
    /// Waiting for funds at the derived deposit address
    AwaitingFunds,
    /// Constructing and signing the forward transaction
    BuildingTransaction,
    /// Submitting the forward to the Bitcoin network
    Broadcasting,
    /// Waiting for the forward to reach the required depth
    AwaitingConfirmation,
    /// Forward confirmed; sidechain credit follows
    Completed,
    /// Unrecoverable error
    Failed,
}

impl Default for DepositState {
    fn default() -> Self {
        Self::AwaitingFunds
    }
}

impl std::fmt::Display for DepositState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingFunds => write!(f, "awaiting_funds"),
            Self::BuildingTransaction => write!(f, "building_transaction"),
            Self::Broadcasting => write!(f, "broadcasting"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A deposit session record, persisted after every state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositSession {
    /// Unique session ID
    pub id: String,
    /// Derived single-use deposit address
    pub deposit_address: String,
    /// Hex-encoded ephemeral secret, kept so a crashed process can resume.
    /// Worthless once the forward confirms.
    pub deposit_secret: String,
    /// Sidechain account the deposit is credited to
    pub recipient: String,
    /// Current state
    pub state: DepositState,
    /// Total value detected at the deposit address, in satoshis
    pub detected_sats: u64,
    /// Forward transaction ID, once built
    pub forward_txid: Option<String>,
    /// Consensus-serialized forward (hex), kept until broadcast succeeds
    pub forward_tx: Option<String>,
    /// Confirmations observed on the forward
    pub confirmations: u32,
    /// Timestamp when the session was opened
    pub created_at: u64,
    /// Timestamp of last transition
    pub updated_at: u64,
    /// Error message if failed
    pub error: Option<String>,
}

impl DepositSession {
    /// Open a new session
    pub fn new(deposit_address: String, deposit_secret: String, recipient: String) -> Self {
        let now = now_secs();
        let id = format!("dep_{}_{:08x}", now, rand::random::<u32>());

        Self {
            id,
            deposit_address,
            deposit_secret,
            recipient,
            state: DepositState::AwaitingFunds,
            detected_sats: 0,
            forward_txid: None,
            forward_tx: None,
            confirmations: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Whether the session has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, DepositState::Completed | DepositState::Failed)
    }

    /// Move to a new state
    pub fn set_state(&mut self, state: DepositState) {
        self.state = state;
        self.touch();
    }

    /// Funds detected; start building
    pub fn mark_building(&mut self, detected_sats: u64) {
        self.detected_sats = detected_sats;
        self.state = DepositState::BuildingTransaction;
        self.touch();
    }

    /// Forward built; start broadcasting
    pub fn mark_broadcasting(&mut self, forward_txid: String, forward_tx: String) {
        self.forward_txid = Some(forward_txid);
        self.forward_tx = Some(forward_tx);
        self.state = DepositState::Broadcasting;
        self.touch();
    }

    /// Broadcast accepted; await depth
    pub fn mark_confirming(&mut self) {
        self.state = DepositState::AwaitingConfirmation;
        self.touch();
    }

    /// Required depth reached
    pub fn mark_completed(&mut self, confirmations: u32) {
        self.confirmations = confirmations;
        self.state = DepositState::Completed;
        self.touch();
    }

    /// Unrecoverable failure
    pub fn mark_failed(&mut self, error: String) {
        self.error = Some(error);
        self.state = DepositState::Failed;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_state() {
        let session = DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into());
        assert_eq!(session.state, DepositState::AwaitingFunds);
        assert!(!session.is_terminal());
        assert!(session.id.starts_with("dep_"));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut session = DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into());

        session.mark_building(10_000_000);
        assert_eq!(session.state, DepositState::BuildingTransaction);
        assert_eq!(session.detected_sats, 10_000_000);

        session.mark_broadcasting("txid".into(), "0200".into());
        assert_eq!(session.state, DepositState::Broadcasting);
        assert_eq!(session.forward_txid.as_deref(), Some("txid"));
        assert_eq!(session.forward_tx.as_deref(), Some("0200"));

        session.mark_confirming();
        assert_eq!(session.state, DepositState::AwaitingConfirmation);

        session.mark_completed(6);
        assert_eq!(session.state, DepositState::Completed);
        assert!(session.is_terminal());
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut session = DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into());
        session.mark_failed("timed out".into());
        assert!(session.is_terminal());
        assert_eq!(session.error.as_deref(), Some("timed out"));
    }

    #[test]
    fn test_serde_round_trip() {
        let session = DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into());
        let json = serde_json::to_string(&session).unwrap();
        let back: DepositSession = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.state, session.state);
    }
}

//! Common Error Types
//!
//! Unified error handling across all modules. Validation errors surface
//! immediately and are never retried; transient chain errors are retried
//! locally (inside the trackers and coordinators) before ever reaching
//! this level.

use thiserror::Error;

/// Root error type for the peg client
#[derive(Debug, Error)]
pub enum PegError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Key generation / address derivation errors
    #[error("key error: {0}")]
    Key(#[from] crate::keys::KeyError),

    /// Signatory snapshot errors
    #[error("signatory error: {0}")]
    Signatory(#[from] crate::signatory::SignatoryError),

    /// Transaction construction errors
    #[error("builder error: {0}")]
    Builder(#[from] crate::builder::BuilderError),

    /// Bitcoin chain access errors
    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    /// Confirmation tracking errors
    #[error("tracker error: {0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    /// Sidechain access errors
    #[error("sidechain error: {0}")]
    Sidechain(#[from] crate::sidechain::SidechainError),

    /// Wallet key errors
    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),

    /// Session storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Deposit coordination errors
    #[error("deposit error: {0}")]
    Deposit(#[from] crate::deposit::coordinator::DepositError),

    /// Withdrawal coordination errors
    #[error("withdrawal error: {0}")]
    Withdrawal(#[from] crate::withdrawal::coordinator::WithdrawalError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PegError {
    /// Whether retrying the whole session may succeed.
    ///
    /// Malformed inputs (keys, snapshots, addresses, caller contract
    /// violations) never are; network and timing failures are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PegError::Chain(_)
                | PegError::Tracker(_)
                | PegError::Sidechain(_)
                | PegError::Storage(_)
                | PegError::Io(_)
        )
    }
}

/// Result type alias using PegError
pub type Result<T> = std::result::Result<T, PegError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainError;
    use crate::signatory::SignatoryError;

    #[test]
    fn test_retryable_classification() {
        let transient: PegError = ChainError::Request("connection reset".into()).into();
        assert!(transient.is_retryable());

        let fatal: PegError = SignatoryError::EmptySet.into();
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_error_display_carries_cause() {
        let err: PegError = ChainError::BroadcastRejected("dust".into()).into();
        assert!(err.to_string().contains("dust"));
    }
}

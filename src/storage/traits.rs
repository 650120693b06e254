//! Storage Trait Definitions
//!
//! Abstract storage interface for peg session records. Implementations:
//! SQLite for durable state, in-memory for tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::deposit::types::DepositSession;
use crate::withdrawal::types::WithdrawalSession;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Peg session storage interface
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new deposit session
    async fn insert_deposit(&self, session: &DepositSession) -> StorageResult<()>;

    /// Update an existing deposit session
    async fn update_deposit(&self, session: &DepositSession) -> StorageResult<()>;

    /// Get a deposit session by ID
    async fn get_deposit(&self, id: &str) -> StorageResult<Option<DepositSession>>;

    /// All deposit sessions not in a terminal state
    async fn active_deposits(&self) -> StorageResult<Vec<DepositSession>>;

    /// Insert a new withdrawal session
    async fn insert_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()>;

    /// Update an existing withdrawal session
    async fn update_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()>;

    /// Get a withdrawal session by ID
    async fn get_withdrawal(&self, id: &str) -> StorageResult<Option<WithdrawalSession>>;

    /// All withdrawal sessions not in a terminal state
    async fn active_withdrawals(&self) -> StorageResult<Vec<WithdrawalSession>>;
}

//! In-Memory Session Storage
//!
//! For tests and development; data is lost when the process exits.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{SessionStore, StorageError, StorageResult};
use crate::deposit::types::DepositSession;
use crate::withdrawal::types::WithdrawalSession;

/// In-memory session store
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    deposits: Arc<RwLock<HashMap<String, DepositSession>>>,
    withdrawals: Arc<RwLock<HashMap<String, WithdrawalSession>>>,
}

impl MemorySessionStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_deposit(&self, session: &DepositSession) -> StorageResult<()> {
        let mut deposits = self.deposits.write().await;
        if deposits.contains_key(&session.id) {
            return Err(StorageError::Duplicate(session.id.clone()));
        }
        deposits.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_deposit(&self, session: &DepositSession) -> StorageResult<()> {
        let mut deposits = self.deposits.write().await;
        if !deposits.contains_key(&session.id) {
            return Err(StorageError::NotFound(session.id.clone()));
        }
        deposits.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_deposit(&self, id: &str) -> StorageResult<Option<DepositSession>> {
        Ok(self.deposits.read().await.get(id).cloned())
    }

    async fn active_deposits(&self) -> StorageResult<Vec<DepositSession>> {
        Ok(self
            .deposits
            .read()
            .await
            .values()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect())
    }

    async fn insert_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()> {
        let mut withdrawals = self.withdrawals.write().await;
        if withdrawals.contains_key(&session.id) {
            return Err(StorageError::Duplicate(session.id.clone()));
        }
        withdrawals.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn update_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()> {
        let mut withdrawals = self.withdrawals.write().await;
        if !withdrawals.contains_key(&session.id) {
            return Err(StorageError::NotFound(session.id.clone()));
        }
        withdrawals.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_withdrawal(&self, id: &str) -> StorageResult<Option<WithdrawalSession>> {
        Ok(self.withdrawals.read().await.get(id).cloned())
    }

    async fn active_withdrawals(&self) -> StorageResult<Vec<WithdrawalSession>> {
        Ok(self
            .withdrawals
            .read()
            .await
            .values()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> DepositSession {
        DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into())
    }

    #[tokio::test]
    async fn test_deposit_insert_get_update() {
        let store = MemorySessionStore::new();
        let mut session = deposit();

        store.insert_deposit(&session).await.unwrap();
        assert!(store.get_deposit(&session.id).await.unwrap().is_some());

        session.mark_building(1_000);
        store.update_deposit(&session).await.unwrap();
        let loaded = store.get_deposit(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.detected_sats, 1_000);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = MemorySessionStore::new();
        let session = deposit();

        store.insert_deposit(&session).await.unwrap();
        assert!(matches!(
            store.insert_deposit(&session).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_rejected() {
        let store = MemorySessionStore::new();
        assert!(matches!(
            store.update_deposit(&deposit()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_active_filters_terminal() {
        let store = MemorySessionStore::new();

        let active = deposit();
        store.insert_deposit(&active).await.unwrap();

        let mut done = deposit();
        done.mark_completed(6);
        store.insert_deposit(&done).await.unwrap();

        let listed = store.active_deposits().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
    }

    #[tokio::test]
    async fn test_withdrawal_round_trip() {
        let store = MemorySessionStore::new();
        let mut session = WithdrawalSession::new("tb1qdest".into(), 5_000_000);

        store.insert_withdrawal(&session).await.unwrap();
        session.mark_threshold_reached("txid".into());
        store.update_withdrawal(&session).await.unwrap();

        let loaded = store.get_withdrawal(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.payout_txid.as_deref(), Some("txid"));
        assert_eq!(store.active_withdrawals().await.unwrap().len(), 1);
    }
}

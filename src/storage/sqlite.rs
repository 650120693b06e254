//! SQLite Session Storage
//!
//! Durable storage for session records, pooled via r2d2. Records are
//! stored as JSON alongside indexed columns for id, state and recency;
//! the JSON is the source of truth when loading.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{SessionStore, StorageError, StorageResult};
use crate::deposit::types::DepositSession;
use crate::withdrawal::types::WithdrawalSession;

/// SQLite-backed session store with connection pooling
pub struct SqliteSessionStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteSessionStore {
    /// Create a store at the given database path, running migrations
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS deposit_sessions (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS withdrawal_sessions (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_deposit_sessions_state
                ON deposit_sessions(state);
            CREATE INDEX IF NOT EXISTS idx_withdrawal_sessions_state
                ON withdrawal_sessions(state);
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    fn insert_row(
        &self,
        table: &str,
        id: &str,
        state: String,
        record: String,
        updated_at: u64,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let sql = format!(
            "INSERT INTO {} (id, state, record, updated_at) VALUES (?1, ?2, ?3, ?4)",
            table
        );

        conn.execute(&sql, params![id, state, record, updated_at as i64])
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StorageError::Duplicate(id.to_string())
                }
                other => StorageError::Database(other.to_string()),
            })?;

        Ok(())
    }

    fn update_row(
        &self,
        table: &str,
        id: &str,
        state: String,
        record: String,
        updated_at: u64,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let sql = format!(
            "UPDATE {} SET state = ?2, record = ?3, updated_at = ?4 WHERE id = ?1",
            table
        );

        let changed = conn
            .execute(&sql, params![id, state, record, updated_at as i64])
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn get_row(&self, table: &str, id: &str) -> StorageResult<Option<String>> {
        let conn = self.conn()?;
        let sql = format!("SELECT record FROM {} WHERE id = ?1", table);

        conn.query_row(&sql, params![id], |row| row.get::<_, String>(0))
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    fn non_terminal_rows(&self, table: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT record FROM {} WHERE state NOT IN ('completed', 'failed') ORDER BY updated_at",
            table
        );

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StorageError::Database(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StorageResult<String> {
    serde_json::to_string(value).map_err(|e| StorageError::InvalidData(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(json: &str) -> StorageResult<T> {
    serde_json::from_str(json).map_err(|e| StorageError::InvalidData(e.to_string()))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn insert_deposit(&self, session: &DepositSession) -> StorageResult<()> {
        self.insert_row(
            "deposit_sessions",
            &session.id,
            session.state.to_string(),
            encode(session)?,
            session.updated_at,
        )
    }

    async fn update_deposit(&self, session: &DepositSession) -> StorageResult<()> {
        self.update_row(
            "deposit_sessions",
            &session.id,
            session.state.to_string(),
            encode(session)?,
            session.updated_at,
        )
    }

    async fn get_deposit(&self, id: &str) -> StorageResult<Option<DepositSession>> {
        match self.get_row("deposit_sessions", id)? {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }

    async fn active_deposits(&self) -> StorageResult<Vec<DepositSession>> {
        self.non_terminal_rows("deposit_sessions")?
            .iter()
            .map(|json| decode(json))
            .collect()
    }

    async fn insert_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()> {
        self.insert_row(
            "withdrawal_sessions",
            &session.id,
            session.state.to_string(),
            encode(session)?,
            session.updated_at,
        )
    }

    async fn update_withdrawal(&self, session: &WithdrawalSession) -> StorageResult<()> {
        self.update_row(
            "withdrawal_sessions",
            &session.id,
            session.state.to_string(),
            encode(session)?,
            session.updated_at,
        )
    }

    async fn get_withdrawal(&self, id: &str) -> StorageResult<Option<WithdrawalSession>> {
        match self.get_row("withdrawal_sessions", id)? {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }

    async fn active_withdrawals(&self) -> StorageResult<Vec<WithdrawalSession>> {
        self.non_terminal_rows("withdrawal_sessions")?
            .iter()
            .map(|json| decode(json))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit() -> DepositSession {
        DepositSession::new("tb1qtest".into(), "ab".repeat(32), "acct".into())
    }

    #[tokio::test]
    async fn test_deposit_persistence_round_trip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut session = deposit();

        store.insert_deposit(&session).await.unwrap();

        session.mark_building(10_000_000);
        store.update_deposit(&session).await.unwrap();

        let loaded = store.get_deposit(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.state, session.state);
        assert_eq!(loaded.detected_sats, 10_000_000);
        assert_eq!(loaded.deposit_secret, session.deposit_secret);
    }

    #[tokio::test]
    async fn test_duplicate_deposit_rejected() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = deposit();

        store.insert_deposit(&session).await.unwrap();
        assert!(matches!(
            store.insert_deposit(&session).await,
            Err(StorageError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_deposit_rejected() {
        let store = SqliteSessionStore::in_memory().unwrap();
        assert!(matches!(
            store.update_deposit(&deposit()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_active_deposits_excludes_terminal() {
        let store = SqliteSessionStore::in_memory().unwrap();

        let active = deposit();
        store.insert_deposit(&active).await.unwrap();

        let mut failed = deposit();
        failed.mark_failed("timeout".into());
        store.insert_deposit(&failed).await.unwrap();

        let listed = store.active_deposits().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);
    }

    #[tokio::test]
    async fn test_withdrawal_persistence_round_trip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut session = WithdrawalSession::new("tb1qdest".into(), 5_000_000);

        store.insert_withdrawal(&session).await.unwrap();
        session.mark_threshold_reached("txid".into());
        store.update_withdrawal(&session).await.unwrap();

        let loaded = store.get_withdrawal(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.payout_txid.as_deref(), Some("txid"));

        session.mark_completed(3);
        store.update_withdrawal(&session).await.unwrap();
        assert!(store.active_withdrawals().await.unwrap().is_empty());
    }
}

//! Session Storage
//!
//! Persists deposit and withdrawal session records so a restarted process
//! can resume in-flight sessions instead of losing progress.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;
pub use traits::{SessionStore, StorageError, StorageResult};

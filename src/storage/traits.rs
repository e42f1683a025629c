use crate::config::SessionMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata kept for every run, used by `list` and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub line_count: u64,
    pub size_bytes: u64,
    pub is_uploaded: bool,
    pub mode: SessionMode,
    pub tag: Option<String>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, mode: SessionMode, tag: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            expired_at: None,
            line_count: 0,
            size_bytes: 0,
            is_uploaded: false,
            mode,
            tag,
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn init_schema(&self) -> Result<(), StorageError>;

    /// Insert a session, replacing any previous record with the same id.
    async fn insert_session(&self, session: &Session) -> Result<(), StorageError>;

    /// Add to the counters of one session as a single atomic update.
    async fn increment_stats(
        &self,
        session_id: &str,
        lines_delta: u64,
        bytes_delta: u64,
    ) -> Result<(), StorageError>;

    async fn mark_uploaded(&self, session_id: &str) -> Result<(), StorageError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError>;

    /// All sessions, newest first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError>;

    /// Returns whether a record was removed. Deleting an unknown id is not an error.
    async fn delete_session(&self, session_id: &str) -> Result<bool, StorageError>;

    /// Returns how many records were removed.
    async fn delete_all(&self) -> Result<usize, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

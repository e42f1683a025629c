use super::traits::{Session, SessionStore, StorageError};
use crate::config::SessionMode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract PID from DuckDB lock error message, "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let stale = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if stale.exists() {
            std::fs::remove_file(&stale)?;
            tracing::info!(path = %stale.display(), "Removed stale database file");
        }
    }
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

/// DuckDB implementation of the SessionStore trait
pub struct DuckDbSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbSessionStore {
    /// Open (or create) the database file. A lock left behind by a process
    /// that no longer exists is cleared once before giving up.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        match Connection::open(path) {
            Ok(conn) => Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            }),
            Err(e) => {
                let error_msg = e.to_string();

                if error_msg.contains("Could not set lock") {
                    tracing::warn!(error = %error_msg, "Database lock detected");

                    if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                        if !is_process_running(pid) {
                            tracing::warn!(pid, "Lock holder is gone, removing stale lock files");
                            if let Err(io_err) = remove_lock_files(path) {
                                tracing::error!(error = %io_err, "Failed to remove lock files");
                                return Err(e.into());
                            }

                            let conn = Connection::open(path)?;
                            return Ok(Self {
                                conn: Arc::new(Mutex::new(conn)),
                            });
                        }
                        tracing::error!(pid, "Database is in use by another uplog process");
                    }
                }

                Err(e.into())
            }
        }
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_session(row: &duckdb::Row<'_>) -> Result<Session, duckdb::Error> {
    let created_micros: i64 = row.get(1)?;
    let expired_micros: Option<i64> = row.get(2)?;
    let mode: String = row.get(6)?;

    Ok(Session {
        session_id: row.get(0)?,
        created_at: from_micros(1, created_micros)?,
        expired_at: expired_micros.map(|m| from_micros(2, m)).transpose()?,
        line_count: row.get::<_, i64>(3)?.max(0) as u64,
        size_bytes: row.get::<_, i64>(4)?.max(0) as u64,
        is_uploaded: row.get(5)?,
        mode: SessionMode::parse(&mode).ok_or_else(|| {
            duckdb::Error::FromSqlConversionFailure(
                6,
                duckdb::types::Type::Text,
                Box::new(StorageError::InvalidData(format!("unknown session mode '{}'", mode))),
            )
        })?,
        tag: row.get(7)?,
    })
}

fn from_micros(column: usize, micros: i64) -> Result<DateTime<Utc>, duckdb::Error> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            column,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })
}

const SELECT_SESSIONS: &str = "SELECT session_id, epoch_us(created_at), epoch_us(expired_at), line_count, size_bytes, is_uploaded, mode, tag
     FROM sessions";

#[async_trait]
impl SessionStore for DuckDbSessionStore {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS sessions (
                    session_id VARCHAR PRIMARY KEY,
                    created_at TIMESTAMPTZ NOT NULL,
                    expired_at TIMESTAMPTZ,
                    line_count BIGINT NOT NULL DEFAULT 0,
                    size_bytes BIGINT NOT NULL DEFAULT 0,
                    is_uploaded BOOLEAN NOT NULL DEFAULT FALSE,
                    mode VARCHAR NOT NULL,
                    tag VARCHAR
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at)",
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let session = session.clone();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO sessions (session_id, created_at, expired_at, line_count, size_bytes, is_uploaded, mode, tag)
                 VALUES (?, to_timestamp(? / 1000000.0), to_timestamp(? / 1000000.0), ?, ?, ?, ?, ?)",
                duckdb::params![
                    session.session_id,
                    session.created_at.timestamp_micros(),
                    session.expired_at.map(|t| t.timestamp_micros()),
                    session.line_count as i64,
                    session.size_bytes as i64,
                    session.is_uploaded,
                    session.mode.as_str(),
                    session.tag,
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn increment_stats(
        &self,
        session_id: &str,
        lines_delta: u64,
        bytes_delta: u64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "UPDATE sessions
                 SET line_count = line_count + ?, size_bytes = size_bytes + ?
                 WHERE session_id = ?",
                duckdb::params![lines_delta as i64, bytes_delta as i64, session_id],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn mark_uploaded(&self, session_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                "UPDATE sessions SET is_uploaded = TRUE WHERE session_id = ?",
                duckdb::params![session_id],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StorageError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<Session>, StorageError> {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&format!("{} WHERE session_id = ?", SELECT_SESSIONS))?;
            let mut rows = stmt.query(duckdb::params![session_id])?;

            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<Session>, StorageError> {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_SESSIONS))?;
            let rows = stmt.query_map([], |row| row_to_session(row))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row?);
            }
            Ok(sessions)
        })
        .await
        .map_err(join_error)?
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let conn = lock(&conn)?;
            let removed = conn.execute(
                "DELETE FROM sessions WHERE session_id = ?",
                duckdb::params![session_id],
            )?;
            Ok(removed > 0)
        })
        .await
        .map_err(join_error)?
    }

    async fn delete_all(&self) -> Result<usize, StorageError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let conn = lock(&conn)?;
            Ok(conn.execute("DELETE FROM sessions", [])?)
        })
        .await
        .map_err(join_error)?
    }
}

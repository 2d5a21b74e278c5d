//! Session persistence
//!
//! [`SessionStore`] is the collaborator the session manager saves through.
//! [`SqliteSessionStore`] keeps records in a SQLite file under the user's
//! data directory; [`MemorySessionStore`] keeps them in process.

use crate::error::{Result, ToolwireError};
use anyhow::Context;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;

pub mod memory;
pub mod types;
pub use memory::MemorySessionStore;
pub use types::{SessionSummary, StoredSession};

/// Environment variable that overrides the SQLite database location.
pub const SESSION_DB_ENV: &str = "TOOLWIRE_SESSION_DB";

/// Persistence backend for sessions.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace a record. `created_at` of an existing record is kept.
    async fn save(&self, record: &StoredSession) -> Result<()>;

    /// Fetch a record by id; `None` if absent.
    async fn load(&self, id: &str) -> Result<Option<StoredSession>>;

    /// Remove a record. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All records, most recently updated first.
    async fn list(&self) -> Result<Vec<SessionSummary>>;
}

/// SQLite-backed session store
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
}

impl SqliteSessionStore {
    /// Create a new store
    ///
    /// Uses `TOOLWIRE_SESSION_DB` when set, otherwise `sessions.db` in the
    /// user's data directory.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var(SESSION_DB_ENV) {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "toolwire", "toolwire")
            .ok_or_else(|| ToolwireError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        Self::new_with_path(data_dir.join("sessions.db"))
    }

    /// Create a store backed by the database at `db_path`.
    ///
    /// # Examples
    ///
    /// ```
    /// use toolwire::storage::SqliteSessionStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteSessionStore::new_with_path(dir.path().join("s.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| ToolwireError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ToolwireError::Storage(e.to_string()))
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                data JSON NOT NULL,
                messages JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                parent_id TEXT
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| ToolwireError::Storage(e.to_string()))?;
        Ok(())
    }

    fn save_blocking(&self, record: &StoredSession) -> Result<()> {
        let mut conn = self.open()?;
        let data_json = serde_json::to_string(&record.data)?;
        let messages_json = serde_json::to_string(&record.messages)?;

        let tx = conn
            .transaction()
            .context("Failed to start transaction")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        // Upsert, keeping the original created_at.
        tx.execute(
            "INSERT INTO sessions (id, user_id, data, messages, created_at, updated_at, parent_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                data = excluded.data,
                messages = excluded.messages,
                updated_at = excluded.updated_at,
                parent_id = excluded.parent_id",
            params![
                record.id,
                record.user_id,
                data_json,
                messages_json,
                record.created_at.to_rfc3339(),
                record.updated_at.to_rfc3339(),
                record.parent_id,
            ],
        )
        .context("Failed to save session")
        .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        tx.commit()
            .context("Failed to commit transaction")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;
        Ok(())
    }

    fn load_blocking(&self, id: &str) -> Result<Option<StoredSession>> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                "SELECT id, user_id, data, messages, created_at, updated_at, parent_id
                FROM sessions WHERE id = ?",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query session")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        let Some((id, user_id, data, messages, created_at, updated_at, parent_id)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredSession {
            id,
            user_id,
            data: serde_json::from_str(&data)?,
            messages: serde_json::from_str(&messages)?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            parent_id,
        }))
    }

    fn delete_blocking(&self, id: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM sessions WHERE id = ?", params![id])
            .context("Failed to delete session")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;
        Ok(())
    }

    fn list_blocking(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, updated_at, parent_id, messages
                FROM sessions
                ORDER BY updated_at DESC",
            )
            .context("Failed to prepare statement")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query sessions")
            .map_err(|e| ToolwireError::Storage(e.to_string()))?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, user_id, updated_at, parent_id, messages) =
                row.map_err(|e| ToolwireError::Storage(e.to_string()))?;
            let message_count = serde_json::from_str::<serde_json::Value>(&messages)
                .ok()
                .and_then(|v| v.as_array().map(Vec::len))
                .unwrap_or(0);
            summaries.push(SessionSummary {
                id,
                user_id,
                updated_at: parse_timestamp(&updated_at)?,
                parent_id,
                message_count,
            });
        }
        Ok(summaries)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ToolwireError::Storage(format!("bad timestamp `{raw}`: {e}")))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolwireError::Storage(format!("storage task failed: {e}")))?
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, record: &StoredSession) -> Result<()> {
        let store = self.clone();
        let record = record.clone();
        blocking(move || store.save_blocking(&record)).await
    }

    async fn load(&self, id: &str) -> Result<Option<StoredSession>> {
        let store = self.clone();
        let id = id.to_string();
        blocking(move || store.load_blocking(&id)).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let store = self.clone();
        let id = id.to_string();
        blocking(move || store.delete_blocking(&id)).await
    }

    async fn list(&self) -> Result<Vec<SessionSummary>> {
        let store = self.clone();
        blocking(move || store.list_blocking()).await
    }
}

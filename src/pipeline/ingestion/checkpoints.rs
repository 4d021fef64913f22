use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::common::error::Result;

/// Per-channel resume cursors for interrupted fetch runs.
///
/// A cursor is written only after the page it came from has been persisted by the
/// landing writer, and is cleared when the channel's history has been fully walked.
pub struct FetchCheckpoints {
    conn: Mutex<Connection>,
}

impl FetchCheckpoints {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fetch_checkpoints (
                channel     TEXT PRIMARY KEY,
                cursor      INTEGER NOT NULL,
                updated_at  TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, channel: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let cursor = conn
            .query_row(
                "SELECT cursor FROM fetch_checkpoints WHERE channel = ?1",
                params![channel],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(cursor)
    }

    pub fn set(&self, channel: &str, cursor: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "INSERT INTO fetch_checkpoints (channel, cursor, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(channel) DO UPDATE SET cursor=excluded.cursor, updated_at=excluded.updated_at",
            params![channel, cursor, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn clear(&self, channel: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute(
            "DELETE FROM fetch_checkpoints WHERE channel = ?1",
            params![channel],
        )?;
        Ok(())
    }
}

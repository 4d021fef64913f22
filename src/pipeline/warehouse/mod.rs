//! Structured store for landed records.
//!
//! The natural keys are enforced as PRIMARY KEYs in SQLite, so two loaders racing
//! on the same rows are serialized by the storage layer and never double-insert.

pub mod enrichment_loader;
pub mod loader;

pub use enrichment_loader::EnrichmentLoader;
pub use loader::{BulkLoader, PartitionScope};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::common::constants::{RAW_DETECTIONS_TABLE, RAW_MESSAGES_TABLE};
use crate::common::error::Result;

const RAW_MESSAGES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_telegram_messages (
    message_id        INTEGER NOT NULL,
    channel_username  TEXT    NOT NULL,
    channel_title     TEXT,
    date              TEXT    NOT NULL,
    text              TEXT,
    views             INTEGER NOT NULL DEFAULT 0 CHECK (views >= 0),
    forwards          INTEGER NOT NULL DEFAULT 0 CHECK (forwards >= 0),
    has_media         INTEGER NOT NULL,
    image_path        TEXT,
    loaded_at         TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (message_id, channel_username)
);
"#;

const RAW_DETECTIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS raw_image_detections (
    message_id        INTEGER NOT NULL,
    channel_name      TEXT    NOT NULL,
    image_path        TEXT,
    image_category    TEXT    NOT NULL
        CHECK (image_category IN ('promotional', 'product_display', 'lifestyle', 'other')),
    detected_objects  TEXT    NOT NULL,
    processed_at      TEXT    NOT NULL,
    loaded_at         TEXT    NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    PRIMARY KEY (message_id, channel_name)
);
"#;

/// Explicit handle to the warehouse database, passed to each loader.
pub struct Warehouse {
    conn: Mutex<Connection>,
}

impl Warehouse {
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub fn ensure_raw_messages_table(&self) -> Result<()> {
        self.execute_batch(RAW_MESSAGES_DDL)
    }

    pub fn ensure_detections_table(&self) -> Result<()> {
        self.execute_batch(RAW_DETECTIONS_DDL)
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        conn.execute_batch(sql)?;
        Ok(())
    }

    /// Run `f` inside one IMMEDIATE transaction. Commits only if `f` succeeds; any
    /// error rolls back everything `f` wrote. Concurrent loaders queue on the
    /// write lock (up to the busy timeout) instead of failing on a stale snapshot.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn raw_message_count(&self) -> Result<i64> {
        self.count(RAW_MESSAGES_TABLE)
    }

    pub fn detection_count(&self) -> Result<i64> {
        self.count(RAW_DETECTIONS_TABLE)
    }

    fn count(&self, table: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap_or_else(|p| p.into_inner());
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    }
}

/// Counts from one loader run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

impl LoadReport {
    pub fn attempted(&self) -> usize {
        self.inserted + self.duplicates + self.skipped
    }
}

/// Per-line result while scanning a JSONL file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    Inserted,
    Ignored,
    ParseFailed,
}

/// Scan one JSONL file, handing each parsed and validated record to `insert`.
///
/// `insert` returns whether a new row was created. Lines that are not UTF-8,
/// not valid JSON, or fail `validate` are counted as skipped and logged with
/// their location; blank lines are ignored. Errors from `insert` propagate.
pub(crate) fn scan_jsonl<T, V, I>(
    path: &Path,
    validate: V,
    mut insert: I,
    report: &mut LoadReport,
) -> Result<()>
where
    T: DeserializeOwned,
    V: Fn(&T) -> std::result::Result<(), String>,
    I: FnMut(&T) -> Result<bool>,
{
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    report.files += 1;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let outcome = match parse_line::<T, V>(&buf, &validate) {
            Ok(None) => continue,
            Ok(Some(record)) => {
                if insert(&record)? {
                    LineOutcome::Inserted
                } else {
                    LineOutcome::Ignored
                }
            }
            Err(reason) => {
                warn!("Skip line {} in {}: {}", line_no, path.display(), reason);
                LineOutcome::ParseFailed
            }
        };
        match outcome {
            LineOutcome::Inserted => report.inserted += 1,
            LineOutcome::Ignored => report.duplicates += 1,
            LineOutcome::ParseFailed => report.skipped += 1,
        }
    }
    Ok(())
}

fn parse_line<T, V>(raw: &[u8], validate: &V) -> std::result::Result<Option<T>, String>
where
    T: DeserializeOwned,
    V: Fn(&T) -> std::result::Result<(), String>,
{
    let line = std::str::from_utf8(raw).map_err(|e| format!("invalid UTF-8: {}", e))?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    let record: T = serde_json::from_str(line).map_err(|e| e.to_string())?;
    validate(&record)?;
    Ok(Some(record))
}

use chrono::NaiveDate;
use rusqlite::params;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{scan_jsonl, LoadReport, Warehouse};
use crate::common::constants::{LANDING_EXT, RAW_MESSAGES_TABLE};
use crate::common::error::Result;
use crate::domain::SourceMessage;
use crate::observability::metrics;

const INSERT_MESSAGE: &str = "INSERT INTO raw_telegram_messages (
        message_id, channel_username, channel_title, date,
        text, views, forwards, has_media, image_path
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT(message_id, channel_username) DO NOTHING";

/// Which landing partitions a load run covers. The default covers everything.
#[derive(Debug, Clone, Default)]
pub struct PartitionScope {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub channels: Option<Vec<String>>,
}

impl PartitionScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes(&self, date: NaiveDate, channel: &str) -> bool {
        if matches!(self.from, Some(from) if date < from) {
            return false;
        }
        if matches!(self.to, Some(to) if date > to) {
            return false;
        }
        match &self.channels {
            Some(channels) => channels.iter().any(|c| c == channel),
            None => true,
        }
    }
}

/// One landing partition file found on disk
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Partition {
    pub date: NaiveDate,
    pub channel: String,
    pub path: PathBuf,
}

/// Moves landed records into `raw_telegram_messages` with insert-or-ignore
/// semantics, so any number of runs over overlapping partitions converge on one
/// row per `(message_id, channel_username)`.
pub struct BulkLoader {
    warehouse: Arc<Warehouse>,
    landing_root: PathBuf,
}

impl BulkLoader {
    pub fn new<P: Into<PathBuf>>(warehouse: Arc<Warehouse>, landing_root: P) -> Self {
        Self {
            warehouse,
            landing_root: landing_root.into(),
        }
    }

    /// Load every partition in `scope` in a single transaction.
    ///
    /// Malformed lines are skipped and counted; duplicate keys are counted as
    /// duplicates. Storage errors roll the whole run back and propagate, and the
    /// run can simply be repeated.
    pub fn load(&self, scope: &PartitionScope) -> Result<LoadReport> {
        self.warehouse.ensure_raw_messages_table()?;
        let partitions = discover_partitions(&self.landing_root, scope)?;
        info!(
            partitions = partitions.len(),
            root = %self.landing_root.display(),
            "Scanning landing partitions"
        );

        let report = self.warehouse.with_transaction(|tx| {
            let mut stmt = tx.prepare_cached(INSERT_MESSAGE)?;
            let mut report = LoadReport::default();
            for partition in &partitions {
                debug!(path = %partition.path.display(), "Loading partition");
                scan_jsonl::<SourceMessage, _, _>(
                    &partition.path,
                    |record| record.validate().map_err(|e| e.to_string()),
                    |record| {
                        let changed = stmt.execute(params![
                            record.message_id,
                            record.channel_username,
                            record.channel_title,
                            record.date.to_rfc3339(),
                            record.text,
                            record.views,
                            record.forwards,
                            record.has_media,
                            record.image_path,
                        ])?;
                        Ok(changed > 0)
                    },
                    &mut report,
                )?;
            }
            Ok(report)
        })?;

        metrics::loader::rows(
            RAW_MESSAGES_TABLE,
            report.inserted,
            report.duplicates,
            report.skipped,
        );
        info!(
            files = report.files,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Raw load finished"
        );
        Ok(report)
    }
}

/// List `<root>/<YYYY-MM-DD>/<channel>.jsonl` files within `scope`, sorted by
/// date then channel. A missing root is an empty landing store.
pub fn discover_partitions(root: &Path, scope: &PartitionScope) -> Result<Vec<Partition>> {
    let mut partitions = Vec::new();
    if !root.is_dir() {
        return Ok(partitions);
    }

    for date_entry in fs::read_dir(root)? {
        let date_entry = date_entry?;
        if !date_entry.file_type()?.is_dir() {
            continue;
        }
        let dir_name = date_entry.file_name();
        let Some(date) = dir_name
            .to_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        else {
            debug!(dir = ?dir_name, "Ignoring non-partition directory");
            continue;
        };

        for file_entry in fs::read_dir(date_entry.path())? {
            let path = file_entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(LANDING_EXT) {
                continue;
            }
            let Some(channel) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if scope.includes(date, &channel) {
                partitions.push(Partition {
                    date,
                    channel,
                    path,
                });
            }
        }
    }

    partitions.sort();
    Ok(partitions)
}

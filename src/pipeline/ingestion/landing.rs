use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::common::constants::LANDING_EXT;
use crate::common::error::Result;
use crate::domain::SourceMessage;
use crate::observability::metrics;

/// Append-only, date x channel partitioned sink for landed messages.
///
/// Layout: `<root>/<YYYY-MM-DD>/<channel>.jsonl`, one JSON object per line.
/// Existing bytes are never rewritten or reordered.
pub struct LandingWriter {
    root: PathBuf,
    // One lock per partition file so same-partition appends never interleave
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LandingWriter {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn partition_path(&self, date: NaiveDate, channel: &str) -> PathBuf {
        partition_path(&self.root, date, channel)
    }

    /// Append a batch of records to their partitions.
    ///
    /// Every record is validated before anything is written, so an invalid record
    /// rejects the whole batch. Filesystem errors propagate; a caller that retries
    /// may re-append records that already landed, which the loader absorbs.
    pub fn append_batch(&self, records: &[SourceMessage]) -> Result<()> {
        for record in records {
            record.validate()?;
        }

        // Group by partition, preserving record order within each file
        let mut partitions: BTreeMap<PathBuf, String> = BTreeMap::new();
        for record in records {
            let path = self.partition_path(record.event_date(), &record.channel_username);
            let buf = partitions.entry(path).or_default();
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut bytes = 0usize;
        for (path, lines) in &partitions {
            if let Err(e) = self.append_to_partition(path, lines) {
                metrics::landing::write_error();
                return Err(e);
            }
            bytes += lines.len();
        }

        metrics::landing::records_written(records.len(), bytes);
        debug!(
            records = records.len(),
            partitions = partitions.len(),
            "Appended batch to landing store"
        );
        Ok(())
    }

    fn append_to_partition(&self, path: &Path, lines: &str) -> Result<()> {
        let lock = self.lock_for(path);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            write_partition(path, lines)
        };
        self.release_lock(path, lock);
        outcome
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the partition's lock entry once no other writer holds a handle to it
    fn release_lock(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // the map's handle plus ours
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }
}

fn write_partition(path: &Path, lines: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?;

    // A torn previous write must stay an isolated line, not prefix our first record
    let mut payload = String::with_capacity(lines.len() + 1);
    if !ends_with_newline(&mut file)? {
        payload.push('\n');
    }
    payload.push_str(lines);

    file.write_all(payload.as_bytes())?;
    file.sync_data()?;
    Ok(())
}

pub fn partition_path(root: &Path, date: NaiveDate, channel: &str) -> PathBuf {
    root.join(date.format("%Y-%m-%d").to_string())
        .join(format!("{}.{}", channel, LANDING_EXT))
}

// Empty files count as terminated
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};
    use tempfile::tempdir;

    fn msg(id: i64, channel: &str, date: &str) -> SourceMessage {
        let date: DateTime<FixedOffset> = DateTime::parse_from_rfc3339(date).unwrap();
        SourceMessage::new(id, channel, "Title", date, Some(format!("m{}", id)), 1, 0, false, None)
            .unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    #[test]
    fn test_records_land_in_their_event_date_partition() {
        let dir = tempdir().unwrap();
        let writer = LandingWriter::new(dir.path());
        // Old history fetched "today" must still land in old partitions
        writer
            .append_batch(&[
                msg(3, "alpha", "2021-06-02T10:00:00+00:00"),
                msg(2, "alpha", "2021-06-01T23:59:59+00:00"),
                msg(1, "alpha", "2021-06-01T00:00:00+00:00"),
            ])
            .unwrap();

        let june1 = dir.path().join("2021-06-01").join("alpha.jsonl");
        let june2 = dir.path().join("2021-06-02").join("alpha.jsonl");
        assert_eq!(read_lines(&june1).len(), 2);
        assert_eq!(read_lines(&june2).len(), 1);

        let first: SourceMessage = serde_json::from_str(&read_lines(&june1)[0]).unwrap();
        assert_eq!(first.message_id, 2);
    }

    #[test]
    fn test_append_never_rewrites_existing_lines() {
        let dir = tempdir().unwrap();
        let writer = LandingWriter::new(dir.path());
        writer.append_batch(&[msg(1, "alpha", "2024-01-01T12:00:00Z")]).unwrap();
        let path = writer.partition_path(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "alpha");
        let before = fs::read(&path).unwrap();

        // Re-append the same record: the landing store is append-only, dedupe is the loader's job
        writer.append_batch(&[msg(1, "alpha", "2024-01-01T12:00:00Z")]).unwrap();
        let after = fs::read(&path).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[test]
    fn test_torn_tail_is_isolated() {
        let dir = tempdir().unwrap();
        let writer = LandingWriter::new(dir.path());
        let path = writer.partition_path(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), "alpha");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"message_id\": 9, \"chann").unwrap();

        writer.append_batch(&[msg(1, "alpha", "2024-01-01T12:00:00Z")]).unwrap();
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert!(serde_json::from_str::<SourceMessage>(&lines[0]).is_err());
        assert_eq!(serde_json::from_str::<SourceMessage>(&lines[1]).unwrap().message_id, 1);
    }

    #[test]
    fn test_invalid_record_rejects_whole_batch() {
        let dir = tempdir().unwrap();
        let writer = LandingWriter::new(dir.path());
        let mut bad = msg(2, "alpha", "2024-01-01T12:00:00Z");
        bad.views = -5;
        let result = writer.append_batch(&[msg(1, "alpha", "2024-01-01T12:00:00Z"), bad]);
        assert!(result.is_err());
        assert!(!dir.path().join("2024-01-01").exists());
    }

    #[test]
    fn test_concurrent_writers_same_partition() {
        let dir = tempdir().unwrap();
        let writer = Arc::new(LandingWriter::new(dir.path()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let writer = writer.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let id = t * 100 + i + 1;
                        writer
                            .append_batch(&[msg(id, "alpha", "2024-05-05T05:05:05Z")])
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let path = writer.partition_path(NaiveDate::from_ymd_opt(2024, 5, 5).unwrap(), "alpha");
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 100);
        for line in lines {
            serde_json::from_str::<SourceMessage>(&line).unwrap();
        }
        assert!(writer.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_partition_locks_are_released_after_append() {
        let dir = tempdir().unwrap();
        let writer = LandingWriter::new(dir.path());
        for day in 1..=20 {
            let date = format!("2024-03-{:02}T10:00:00Z", day);
            writer
                .append_batch(&[msg(day, "alpha", &date), msg(day + 100, "beta", &date)])
                .unwrap();
        }
        assert!(writer.locks.lock().unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 20);
    }
}

use rusqlite::params;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{scan_jsonl, LoadReport, Warehouse};
use crate::common::constants::RAW_DETECTIONS_TABLE;
use crate::common::error::Result;
use crate::domain::ClassificationRecord;
use crate::observability::metrics;

const INSERT_DETECTION: &str = "INSERT INTO raw_image_detections (
        message_id, channel_name, image_path, image_category, detected_objects, processed_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(message_id, channel_name) DO NOTHING";

/// Loads the enrichment output file into `raw_image_detections`.
///
/// Same policy as the raw loader: the table is created if absent and never
/// dropped, rows are insert-or-ignore on `(message_id, channel_name)`.
pub struct EnrichmentLoader {
    warehouse: Arc<Warehouse>,
    detections_file: PathBuf,
}

impl EnrichmentLoader {
    pub fn new<P: Into<PathBuf>>(warehouse: Arc<Warehouse>, detections_file: P) -> Self {
        Self {
            warehouse,
            detections_file: detections_file.into(),
        }
    }

    pub fn load(&self) -> Result<LoadReport> {
        self.warehouse.ensure_detections_table()?;
        if !self.detections_file.is_file() {
            warn!(
                path = %self.detections_file.display(),
                "No detections file, nothing to load"
            );
            return Ok(LoadReport::default());
        }

        let report = self.warehouse.with_transaction(|tx| {
            let mut stmt = tx.prepare_cached(INSERT_DETECTION)?;
            let mut report = LoadReport::default();
            scan_jsonl::<ClassificationRecord, _, _>(
                &self.detections_file,
                |record| record.validate(),
                |record| {
                    let detected = serde_json::to_string(&record.detected_objects)?;
                    let changed = stmt.execute(params![
                        record.message_id,
                        record.channel_name,
                        record.image_path,
                        record.image_category.as_str(),
                        detected,
                        record.processed_at.to_rfc3339(),
                    ])?;
                    Ok(changed > 0)
                },
                &mut report,
            )?;
            Ok(report)
        })?;

        metrics::loader::rows(
            RAW_DETECTIONS_TABLE,
            report.inserted,
            report.duplicates,
            report.skipped,
        );
        info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Detections load finished"
        );
        Ok(report)
    }
}

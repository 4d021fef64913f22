use chrono::Utc;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::ports::ObjectDetector;
use crate::common::error::Result;
use crate::domain::{ClassificationRecord, ImageCategory};
use crate::observability::metrics;
use crate::pipeline::ingestion::attachments::parse_attachment_key;
use crate::pipeline::ingestion::AttachmentStore;

/// Counts from one enrichment run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub images: usize,
    pub classified: usize,
    pub failed: usize,
}

/// Runs the object detector over every stored attachment and writes one
/// classification line per image.
///
/// Lines are streamed to a temporary file that replaces the output file only once
/// the run finishes, so the enrichment loader never reads a half-written run.
pub struct EnrichmentRunner {
    detector: Arc<dyn ObjectDetector>,
    attachments: Arc<AttachmentStore>,
    output_path: PathBuf,
}

impl EnrichmentRunner {
    pub fn new<P: Into<PathBuf>>(
        detector: Arc<dyn ObjectDetector>,
        attachments: Arc<AttachmentStore>,
        output_path: P,
    ) -> Self {
        Self {
            detector,
            attachments,
            output_path: output_path.into(),
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub async fn run(&self) -> Result<EnrichmentReport> {
        let images = list_images(self.attachments.images_dir())?;
        info!(
            images = images.len(),
            dir = %self.attachments.images_dir().display(),
            "Classifying attachments"
        );

        if let Some(parent) = self.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.output_path.with_extension("jsonl.tmp");
        let mut out = BufWriter::new(File::create(&tmp_path)?);
        let mut report = EnrichmentReport {
            images: images.len(),
            ..Default::default()
        };

        for (channel, message_id, path) in &images {
            let detections = match self.detector.detect(path).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Detector failed on {}: {}", path.display(), e);
                    metrics::enrichment::detector_failed();
                    report.failed += 1;
                    continue;
                }
            };

            let image_category = ImageCategory::from_detections(&detections);
            let record = ClassificationRecord {
                message_id: *message_id,
                channel_name: channel.clone(),
                image_path: self.attachments.relative(path),
                image_category,
                detected_objects: detections,
                processed_at: Utc::now(),
            };
            serde_json::to_writer(&mut out, &record)?;
            out.write_all(b"\n")?;
            debug!(channel = %channel, message_id, category = %image_category, "Classified");
            metrics::enrichment::image_classified(image_category.as_str());
            report.classified += 1;
        }

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        drop(file);
        fs::rename(&tmp_path, &self.output_path)?;

        info!(
            classified = report.classified,
            failed = report.failed,
            output = %self.output_path.display(),
            "Enrichment finished"
        );
        Ok(report)
    }
}

/// Every `<images-dir>/<channel>/<message_id>.jpg`, sorted by channel then id.
fn list_images(images_dir: &Path) -> Result<Vec<(String, i64, PathBuf)>> {
    let mut images = Vec::new();
    if !images_dir.is_dir() {
        return Ok(images);
    }
    for channel_entry in fs::read_dir(images_dir)? {
        let channel_entry = channel_entry?;
        if !channel_entry.file_type()?.is_dir() {
            continue;
        }
        for file_entry in fs::read_dir(channel_entry.path())? {
            let path = file_entry?.path();
            if !path.is_file() {
                continue;
            }
            if let Some((channel, message_id)) = parse_attachment_key(&path) {
                images.push((channel, message_id, path));
            }
        }
    }
    images.sort();
    Ok(images)
}

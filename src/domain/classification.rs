use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::constants::{PERSON_LABEL, PRODUCT_LIKE_LABELS};

/// Closed set of image categories produced by enrichment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    Promotional,
    ProductDisplay,
    Lifestyle,
    Other,
}

impl ImageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageCategory::Promotional => "promotional",
            ImageCategory::ProductDisplay => "product_display",
            ImageCategory::Lifestyle => "lifestyle",
            ImageCategory::Other => "other",
        }
    }

    /// Categorise an image from its detections.
    ///
    /// person + product => promotional, product only => product_display,
    /// person only => lifestyle, anything else => other.
    pub fn from_detections(detections: &[Detection]) -> Self {
        let has_person = detections.iter().any(|d| d.label == PERSON_LABEL);
        let has_product = detections
            .iter()
            .any(|d| PRODUCT_LIKE_LABELS.contains(&d.label.as_str()));
        match (has_person, has_product) {
            (true, true) => ImageCategory::Promotional,
            (false, true) => ImageCategory::ProductDisplay,
            (true, false) => ImageCategory::Lifestyle,
            (false, false) => ImageCategory::Other,
        }
    }
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One object the detector found in an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// In [0, 1]
    pub confidence: f64,
}

/// Enrichment output for one attachment; one JSON line in the detections file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub message_id: i64,
    pub channel_name: String,
    pub image_path: String,
    pub image_category: ImageCategory,
    pub detected_objects: Vec<Detection>,
    pub processed_at: DateTime<Utc>,
}

impl ClassificationRecord {
    pub fn validate(&self) -> Result<(), String> {
        if self.message_id <= 0 {
            return Err(format!("message_id must be positive, got {}", self.message_id));
        }
        if self.channel_name.trim().is_empty() {
            return Err("channel_name must not be empty".into());
        }
        if let Some(bad) = self
            .detected_objects
            .iter()
            .find(|d| !(0.0..=1.0).contains(&d.confidence))
        {
            return Err(format!(
                "confidence {} for '{}' is outside [0, 1]",
                bad.confidence, bad.label
            ));
        }
        Ok(())
    }
}

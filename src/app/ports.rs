use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::path::Path;

use crate::common::error::SourceError;
use crate::domain::Detection;

/// One page of channel history, newest message first.
#[derive(Clone, Debug, Deserialize)]
pub struct HistoryPage {
    pub channel_title: String,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

/// A message as the source returns it, before it becomes a landing record.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteMessage {
    pub id: i64,
    pub date: DateTime<FixedOffset>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub views: Option<i64>,
    #[serde(default)]
    pub forwards: Option<i64>,
    #[serde(default)]
    pub media: Option<RemoteMedia>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteMedia {
    pub kind: MediaKind,
    /// Where the bytes can be fetched from, when the source exposes it
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    #[serde(other)]
    Other,
}

impl RemoteMessage {
    /// Only photos are downloaded as attachments
    pub fn has_photo(&self) -> bool {
        matches!(&self.media, Some(m) if m.kind == MediaKind::Photo)
    }
}

/// A paginated message source (the platform transport).
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Fetch up to `limit` messages strictly older than `offset_id`, or the newest
    /// messages when `offset_id` is `None`.
    async fn fetch_history(
        &self,
        channel: &str,
        offset_id: Option<i64>,
        limit: usize,
    ) -> Result<HistoryPage, SourceError>;

    /// Download the bytes of a message's media.
    async fn download_media(
        &self,
        channel: &str,
        message: &RemoteMessage,
    ) -> Result<Vec<u8>, SourceError>;
}

/// Object detection over one image file. The model itself lives outside this crate.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, image_path: &Path) -> Result<Vec<Detection>, String>;
}

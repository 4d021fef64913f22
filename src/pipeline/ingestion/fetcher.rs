use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::app::ports::{HistoryPage, MessageSource, RemoteMessage};
use crate::common::constants::MAX_PAGE_SIZE;
use crate::common::error::{Result, SourceError};
use crate::config::FetchConfig;
use crate::domain::SourceMessage;
use crate::observability::metrics;
use crate::pipeline::ingestion::attachments::AttachmentStore;
use crate::pipeline::ingestion::checkpoints::FetchCheckpoints;
use crate::pipeline::ingestion::landing::LandingWriter;

#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub page_size: usize,
    pub request_timeout: Duration,
    pub max_concurrent_channels: usize,
    pub resume_from_checkpoint: bool,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            request_timeout: Duration::from_secs(30),
            max_concurrent_channels: 1,
            resume_from_checkpoint: true,
        }
    }
}

impl From<&FetchConfig> for FetcherSettings {
    fn from(cfg: &FetchConfig) -> Self {
        Self {
            page_size: cfg.page_size.clamp(1, MAX_PAGE_SIZE),
            request_timeout: cfg.request_timeout(),
            max_concurrent_channels: cfg.max_concurrent_channels.max(1),
            resume_from_checkpoint: cfg.resume_from_checkpoint,
        }
    }
}

/// What happened to one message's media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    NoMedia,
    Attached(String),
    SkippedDownload(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Completed,
    /// Transport failure ended this channel early; already-landed pages stay landed
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub channel: String,
    pub messages: usize,
    pub pages: usize,
    pub attachments: usize,
    pub skipped_downloads: usize,
    pub invalid: usize,
    pub flood_waits: usize,
    pub outcome: ChannelOutcome,
}

impl ChannelReport {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            messages: 0,
            pages: 0,
            attachments: 0,
            skipped_downloads: 0,
            invalid: 0,
            flood_waits: 0,
            outcome: ChannelOutcome::Completed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.outcome == ChannelOutcome::Completed
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    pub channels: Vec<ChannelReport>,
}

impl FetchSummary {
    pub fn total_messages(&self) -> usize {
        self.channels.iter().map(|c| c.messages).sum()
    }

    pub fn aborted(&self) -> Vec<&ChannelReport> {
        self.channels.iter().filter(|c| !c.is_complete()).collect()
    }

    /// Messages dropped by validation across all channels
    pub fn total_invalid(&self) -> usize {
        self.channels.iter().map(|c| c.invalid).sum()
    }

    pub fn total_skipped_downloads(&self) -> usize {
        self.channels.iter().map(|c| c.skipped_downloads).sum()
    }

    /// Channels that completed with every fetched message landed
    pub fn clean(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.is_complete() && c.invalid == 0)
            .count()
    }
}

/// Walks each channel's history newest-to-oldest and hands every page to the
/// landing writer.
#[derive(Clone)]
pub struct ChannelFetcher {
    source: Arc<dyn MessageSource>,
    writer: Arc<LandingWriter>,
    attachments: Arc<AttachmentStore>,
    checkpoints: Option<Arc<FetchCheckpoints>>,
    settings: FetcherSettings,
}

impl ChannelFetcher {
    pub fn new(
        source: Arc<dyn MessageSource>,
        writer: Arc<LandingWriter>,
        attachments: Arc<AttachmentStore>,
        settings: FetcherSettings,
    ) -> Self {
        Self {
            source,
            writer,
            attachments,
            checkpoints: None,
            settings,
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<FetchCheckpoints>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Fetch every configured channel. Channels run one after another unless
    /// `max_concurrent_channels` allows more; each channel keeps its own cursor
    /// and its own flood-wait handling either way.
    ///
    /// A channel that hits a transport error is reported as aborted and the run
    /// carries on. Landing or checkpoint storage failures end the whole call.
    pub async fn fetch_all(&self, channels: &[String]) -> Result<FetchSummary> {
        let mut unique: Vec<String> = Vec::with_capacity(channels.len());
        for channel in channels {
            if !unique.contains(channel) {
                unique.push(channel.clone());
            }
        }

        let mut summary = FetchSummary::default();
        if self.settings.max_concurrent_channels <= 1 || unique.len() <= 1 {
            for channel in &unique {
                summary.channels.push(self.fetch_channel(channel).await?);
            }
            return Ok(summary);
        }

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_channels));
        let mut tasks = JoinSet::new();
        for (index, channel) in unique.into_iter().enumerate() {
            let fetcher = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, fetcher.fetch_channel(&channel).await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, report) = joined?;
            results.push((index, report?));
        }
        results.sort_by_key(|(index, _)| *index);
        summary.channels = results.into_iter().map(|(_, report)| report).collect();
        Ok(summary)
    }

    /// Walk one channel's full history. Returns the per-channel report; the
    /// number of messages handed to the writer is `report.messages`.
    pub async fn fetch_channel(&self, channel: &str) -> Result<ChannelReport> {
        let span = info_span!("channel", channel = %channel);
        async {
            let mut report = ChannelReport::new(channel);
            info!("Starting channel fetch");
            self.walk_history(channel, &mut report).await?;
            match &report.outcome {
                ChannelOutcome::Completed => info!(
                    messages = report.messages,
                    pages = report.pages,
                    attachments = report.attachments,
                    skipped_downloads = report.skipped_downloads,
                    "Finished channel"
                ),
                ChannelOutcome::Aborted(reason) => warn!(
                    messages = report.messages,
                    pages = report.pages,
                    reason = %reason,
                    "Channel aborted, partial history landed"
                ),
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn walk_history(&self, channel: &str, report: &mut ChannelReport) -> Result<()> {
        let mut cursor = self.initial_cursor(channel)?;
        if let Some(c) = cursor {
            info!(cursor = c, "Resuming from checkpoint");
        }

        loop {
            let page = match self.request_page(channel, cursor, report).await {
                Ok(page) => page,
                Err(e) => {
                    error!(cursor = ?cursor, "Error fetching history: {}", e);
                    metrics::fetcher::channel_aborted();
                    report.outcome = ChannelOutcome::Aborted(e.to_string());
                    return Ok(());
                }
            };
            report.pages += 1;
            metrics::fetcher::page_fetched(page.messages.len());

            if page.messages.is_empty() {
                break;
            }
            let page_len = page.messages.len();

            let batch = self.build_batch(channel, &page, cursor, report).await;
            // Persist before the cursor moves: a crash here re-fetches this page, never skips it
            let landed = batch.len();
            self.persist_batch(batch).await?;
            report.messages += landed;

            let oldest = page.messages.iter().map(|m| m.id).min();
            match (oldest, cursor) {
                (Some(oldest), Some(current)) if oldest >= current => {
                    warn!(oldest, current, "Source returned no older messages, stopping");
                    report.outcome = ChannelOutcome::Aborted(format!(
                        "cursor did not advance past {}",
                        current
                    ));
                    return Ok(());
                }
                _ => {}
            }
            cursor = oldest;
            if let Some(c) = cursor {
                self.save_cursor(channel, Some(c)).await?;
            }
            debug!(cursor = ?cursor, page_len, "Page persisted");

            if page_len < self.settings.page_size {
                break;
            }
        }

        self.save_cursor(channel, None).await
    }

    /// Append a page to the landing store off the async workers
    async fn persist_batch(&self, batch: Vec<SourceMessage>) -> Result<()> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.append_batch(&batch)).await?
    }

    /// Record the channel's cursor, or clear it with `None` once the walk is done
    async fn save_cursor(&self, channel: &str, cursor: Option<i64>) -> Result<()> {
        let Some(checkpoints) = self.checkpoints.clone() else {
            return Ok(());
        };
        let channel = channel.to_string();
        tokio::task::spawn_blocking(move || match cursor {
            Some(c) => checkpoints.set(&channel, c),
            None => checkpoints.clear(&channel),
        })
        .await?
    }

    fn initial_cursor(&self, channel: &str) -> Result<Option<i64>> {
        match (&self.checkpoints, self.settings.resume_from_checkpoint) {
            (Some(checkpoints), true) => checkpoints.get(channel),
            _ => Ok(None),
        }
    }

    /// Request one page, sleeping out flood waits for exactly as long as the
    /// source demands and retrying the identical request.
    async fn request_page(
        &self,
        channel: &str,
        cursor: Option<i64>,
        report: &mut ChannelReport,
    ) -> std::result::Result<HistoryPage, SourceError> {
        loop {
            let call = self
                .source
                .fetch_history(channel, cursor, self.settings.page_size);
            let result = match tokio::time::timeout(self.settings.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Transport(format!(
                    "history request timed out after {}s",
                    self.settings.request_timeout.as_secs()
                ))),
            };
            match result {
                Err(SourceError::FloodWait(wait)) => {
                    report.flood_waits += 1;
                    metrics::fetcher::flood_wait(wait.as_secs());
                    warn!(
                        wait_secs = wait.as_secs(),
                        cursor = ?cursor,
                        "Rate limit hit, waiting before retrying the same page"
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn build_batch(
        &self,
        channel: &str,
        page: &HistoryPage,
        cursor: Option<i64>,
        report: &mut ChannelReport,
    ) -> Vec<SourceMessage> {
        let mut batch = Vec::with_capacity(page.messages.len());
        for remote in &page.messages {
            if matches!(cursor, Some(c) if remote.id >= c) {
                debug!(message_id = remote.id, "Skipping message at or above cursor");
                continue;
            }

            let mut record = match SourceMessage::new(
                remote.id,
                channel,
                page.channel_title.as_str(),
                remote.date,
                remote.text.clone(),
                remote.views.unwrap_or(0),
                remote.forwards.unwrap_or(0),
                remote.media.is_some(),
                None,
            ) {
                Ok(record) => record,
                Err(e) => {
                    warn!(message_id = remote.id, "Dropping invalid message: {}", e);
                    report.invalid += 1;
                    continue;
                }
            };

            match self.download_attachment(channel, remote).await {
                AttachmentOutcome::NoMedia => {}
                AttachmentOutcome::Attached(path) => {
                    report.attachments += 1;
                    record.image_path = Some(path);
                }
                AttachmentOutcome::SkippedDownload(reason) => {
                    warn!(message_id = remote.id, "Attachment download failed: {}", reason);
                    report.skipped_downloads += 1;
                    metrics::fetcher::download_skipped();
                }
            }
            batch.push(record);
        }
        batch
    }

    async fn download_attachment(&self, channel: &str, remote: &RemoteMessage) -> AttachmentOutcome {
        if !remote.has_photo() {
            return AttachmentOutcome::NoMedia;
        }
        if let Some(existing) = self.attachments.existing(channel, remote.id) {
            return AttachmentOutcome::Attached(existing);
        }

        let call = self.source.download_media(channel, remote);
        let bytes = match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return AttachmentOutcome::SkippedDownload(e.to_string()),
            Err(_) => {
                return AttachmentOutcome::SkippedDownload(format!(
                    "download timed out after {}s",
                    self.settings.request_timeout.as_secs()
                ))
            }
        };
        match self.attachments.store(channel, remote.id, &bytes) {
            Ok(path) => {
                metrics::fetcher::attachment_downloaded();
                AttachmentOutcome::Attached(path)
            }
            Err(e) => AttachmentOutcome::SkippedDownload(e.to_string()),
        }
    }
}

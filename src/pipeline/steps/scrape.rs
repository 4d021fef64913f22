use async_trait::async_trait;
use tracing::{info, warn};

use super::{PipelineStep, StepResult};
use crate::common::constants::SCRAPE_STAGE;
use crate::common::error::{PipelineError, Result};
use crate::domain::message::check_channel_name;
use crate::pipeline::ingestion::ChannelFetcher;

/// Fetches every configured channel into the landing store
pub struct ScrapeStep {
    fetcher: ChannelFetcher,
    channels: Vec<String>,
}

impl ScrapeStep {
    pub fn new(fetcher: ChannelFetcher, channels: Vec<String>) -> Self {
        Self { fetcher, channels }
    }
}

#[async_trait]
impl PipelineStep for ScrapeStep {
    async fn execute(&self) -> Result<StepResult> {
        if self.channels.is_empty() {
            return Err(PipelineError::Config(
                "no channels configured (set source.channels or CHANNELS)".into(),
            ));
        }
        for channel in &self.channels {
            check_channel_name(channel).map_err(PipelineError::Config)?;
        }
        info!("Scraping {} channel(s)", self.channels.len());

        let summary = self.fetcher.fetch_all(&self.channels).await?;
        let aborted: Vec<String> = summary
            .aborted()
            .iter()
            .map(|r| r.channel.clone())
            .collect();
        if !aborted.is_empty() {
            warn!("Channels aborted before completion: {}", aborted.join(", "));
        }

        let total = summary.channels.len();
        let invalid = summary.total_invalid();
        let skipped_downloads = summary.total_skipped_downloads();
        if invalid > 0 {
            warn!("{} fetched message(s) failed validation and were not landed", invalid);
        }

        let mut message = format!(
            "fetched {} messages from {}/{} channels, {} invalid dropped, {} attachment downloads skipped",
            summary.total_messages(),
            total - aborted.len(),
            total,
            invalid,
            skipped_downloads
        );
        if !aborted.is_empty() {
            message.push_str(&format!(" (aborted: {})", aborted.join(", ")));
        }
        let clean = summary.clean();
        Ok(StepResult::success(total, clean, total - clean, message))
    }

    fn step_name(&self) -> &'static str {
        SCRAPE_STAGE
    }
}

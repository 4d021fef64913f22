use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::app::ports::{HistoryPage, MessageSource, RemoteMessage};
use crate::common::error::{PipelineError, Result, SourceError};
use crate::config::SourceConfig;

/// Wait applied when the bridge answers 429 without saying for how long
const DEFAULT_FLOOD_WAIT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct RetryAfterBody {
    retry_after: u64,
}

/// `MessageSource` backed by an HTTP JSON bridge in front of the messaging
/// platform.
///
/// `GET {base}/channels/{channel}/messages?limit=N[&offset_id=ID]` returns one
/// `HistoryPage`; media bytes are fetched from each message's `media.url`.
pub struct HttpMessageSource {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpMessageSource {
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PipelineError::Config(format!("invalid source.base_url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PipelineError::Config(format!(
                "source.base_url '{}' cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("channel_harvest/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn from_config(source: &SourceConfig, timeout: Duration) -> Result<Self> {
        Self::new(&source.base_url, source.api_token.clone(), timeout)
    }

    /// The channel is one percent-encoded path segment
    fn history_url(&self, channel: &str) -> std::result::Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Transport(format!("cannot build a path on {}", self.base_url)))?
            .pop_if_empty()
            .extend(["channels", channel, "messages"]);
        Ok(url)
    }

    /// Bridge-relative media paths hang off the base url, anything else is used as is
    fn media_url(&self, url: &str) -> std::result::Result<Url, SourceError> {
        let joined = if url.starts_with('/') {
            format!("{}{}", self.base_url.as_str().trim_end_matches('/'), url)
        } else {
            url.to_string()
        };
        Url::parse(&joined)
            .map_err(|e| SourceError::Transport(format!("bad media url '{}': {}", url, e)))
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => req.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, channel: &str) -> std::result::Result<Vec<u8>, SourceError> {
        let resp = self.authorized(req).send().await?;
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await?.to_vec();
        match classify_status(status, retry_after.as_deref(), &body, channel) {
            Some(err) => Err(err),
            None => Ok(body),
        }
    }
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn fetch_history(
        &self,
        channel: &str,
        offset_id: Option<i64>,
        limit: usize,
    ) -> std::result::Result<HistoryPage, SourceError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(offset) = offset_id {
            query.push(("offset_id", offset.to_string()));
        }
        let url = self.history_url(channel)?;
        debug!(url = %url, ?offset_id, limit, "Requesting history page");

        let body = self.send(self.client.get(url).query(&query), channel).await?;
        parse_history_page(&body)
    }

    async fn download_media(
        &self,
        channel: &str,
        message: &RemoteMessage,
    ) -> std::result::Result<Vec<u8>, SourceError> {
        let url = message
            .media
            .as_ref()
            .and_then(|m| m.url.as_deref())
            .ok_or_else(|| {
                SourceError::Transport(format!("message {} has no media url", message.id))
            })?;
        let url = self.media_url(url)?;
        self.send(self.client.get(url), channel).await
    }
}

/// Map a non-success response onto a `SourceError`. `None` means success.
///
/// A `retry_after` hint in the body is honored on any error status, since some
/// bridges relay the platform's own flood code instead of 429.
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after_header: Option<&str>,
    body: &[u8],
    channel: &str,
) -> Option<SourceError> {
    if status.is_success() {
        return None;
    }
    let header_wait = retry_after_header.and_then(|v| v.trim().parse::<u64>().ok());
    let body_wait = serde_json::from_slice::<RetryAfterBody>(body)
        .ok()
        .map(|b| b.retry_after);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let wait = header_wait
            .or(body_wait)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FLOOD_WAIT);
        return Some(SourceError::FloodWait(wait));
    }
    if let Some(secs) = body_wait {
        return Some(SourceError::FloodWait(Duration::from_secs(secs)));
    }
    if status == StatusCode::NOT_FOUND {
        return Some(SourceError::NotFound(channel.to_string()));
    }

    let snippet: String = String::from_utf8_lossy(body).chars().take(200).collect();
    Some(SourceError::Transport(format!("HTTP {}: {}", status, snippet)))
}

pub(crate) fn parse_history_page(body: &[u8]) -> std::result::Result<HistoryPage, SourceError> {
    serde_json::from_slice(body)
        .map_err(|e| SourceError::Transport(format!("invalid history page: {}", e)))
}

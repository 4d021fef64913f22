use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::common::error::{PipelineError, Result};

/// One landed channel message. Identity is `(message_id, channel_username)`.
///
/// The serialized form is exactly one landing line, so field names here are the
/// landing file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub message_id: i64,
    pub channel_username: String,
    pub channel_title: String,
    /// Event time as reported by the source, offset preserved
    pub date: DateTime<FixedOffset>,
    pub text: Option<String>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub forwards: i64,
    pub has_media: bool,
    /// Attachment path relative to the data root, when one was downloaded
    pub image_path: Option<String>,
}

impl SourceMessage {
    /// Build a validated record. Counters that the source omitted should be passed as 0.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_id: i64,
        channel_username: impl Into<String>,
        channel_title: impl Into<String>,
        date: DateTime<FixedOffset>,
        text: Option<String>,
        views: i64,
        forwards: i64,
        has_media: bool,
        image_path: Option<String>,
    ) -> Result<Self> {
        let record = Self {
            message_id,
            channel_username: channel_username.into(),
            channel_title: channel_title.into(),
            date,
            text,
            views,
            forwards,
            has_media,
            image_path,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the invariants a landed record must hold.
    pub fn validate(&self) -> Result<()> {
        if self.message_id <= 0 {
            return Err(PipelineError::Validation(format!(
                "message_id must be positive, got {}",
                self.message_id
            )));
        }
        check_channel_name(&self.channel_username).map_err(PipelineError::Validation)?;
        if self.views < 0 || self.forwards < 0 {
            return Err(PipelineError::Validation(format!(
                "negative counters on {}/{}: views={} forwards={}",
                self.channel_username, self.message_id, self.views, self.forwards
            )));
        }
        if self.image_path.is_some() && !self.has_media {
            return Err(PipelineError::Validation(format!(
                "{}/{} has an image_path but has_media is false",
                self.channel_username, self.message_id
            )));
        }
        Ok(())
    }

    /// Partition date, taken from the event timestamp in its own offset.
    pub fn event_date(&self) -> NaiveDate {
        self.date.date_naive()
    }
}

/// Channel names double as partition and image directory names, so they must be
/// a single non-hidden path component.
pub fn check_channel_name(name: &str) -> std::result::Result<(), String> {
    if name.trim().is_empty() {
        return Err("channel name must not be empty".into());
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(format!(
            "channel name '{}' is not usable as a partition file name",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_new_accepts_valid_record() {
        let msg = SourceMessage::new(
            42,
            "alpha",
            "Alpha Pharmacy",
            ts("2025-01-10T08:30:00+03:00"),
            Some("hello".into()),
            10,
            2,
            true,
            Some("raw/images/alpha/42.jpg".into()),
        )
        .unwrap();
        assert_eq!((msg.message_id, msg.channel_username.as_str()), (42, "alpha"));
    }

    #[test]
    fn test_new_rejects_bad_records() {
        let date = ts("2025-01-10T08:30:00Z");
        assert!(SourceMessage::new(0, "alpha", "A", date, None, 0, 0, false, None).is_err());
        assert!(SourceMessage::new(1, "  ", "A", date, None, 0, 0, false, None).is_err());
        assert!(SourceMessage::new(1, "../etc", "A", date, None, 0, 0, false, None).is_err());
        assert!(SourceMessage::new(1, "alpha", "A", date, None, -1, 0, false, None).is_err());
        assert!(
            SourceMessage::new(1, "alpha", "A", date, None, 0, 0, false, Some("x.jpg".into()))
                .is_err()
        );
    }

    #[test]
    fn test_event_date_uses_own_offset() {
        // 23:30 at +03:00 is 20:30 UTC on the same day; 01:00 at +03:00 is the previous UTC day
        let late = ts("2025-03-01T23:30:00+03:00");
        let early = ts("2025-03-02T01:00:00+03:00");
        let a = SourceMessage::new(1, "alpha", "A", late, None, 0, 0, false, None).unwrap();
        let b = SourceMessage::new(2, "alpha", "A", early, None, 0, 0, false, None).unwrap();
        assert_eq!(a.event_date().to_string(), "2025-03-01");
        assert_eq!(b.event_date().to_string(), "2025-03-02");
    }

    #[test]
    fn test_missing_counters_default_to_zero() {
        let line = r#"{"message_id":7,"channel_username":"alpha","channel_title":"A","date":"2025-01-01T00:00:00+00:00","text":null,"has_media":false,"image_path":null}"#;
        let msg: SourceMessage = serde_json::from_str(line).unwrap();
        assert_eq!(msg.views, 0);
        assert_eq!(msg.forwards, 0);
    }

    #[test]
    fn test_channel_name_rule() {
        assert!(check_channel_name("alpha_shop").is_ok());
        assert!(check_channel_name("").is_err());
        assert!(check_channel_name(".alpha").is_err());
        assert!(check_channel_name("a\\b").is_err());
        assert!(check_channel_name("a/b").is_err());
    }
}

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },
}

impl PipelineError {
    /// The innermost message, without this crate's own prefixes. A stage
    /// failure is surfaced with this text unchanged.
    pub fn root_message(&self) -> String {
        match self {
            PipelineError::Http(e) => e.to_string(),
            PipelineError::Json(e) => e.to_string(),
            PipelineError::Toml(e) => e.to_string(),
            PipelineError::Io(e) => e.to_string(),
            PipelineError::Sqlite(e) => e.to_string(),
            PipelineError::Join(e) => e.to_string(),
            PipelineError::Config(msg) | PipelineError::Validation(msg) => msg.clone(),
            PipelineError::Stage { message, .. } => message.clone(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors reported by a message source. Only `FloodWait` is retried; everything
/// else ends the current channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("flood wait: source requires waiting {}s", .0.as_secs())]
    FloodWait(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel not found: {0}")]
    NotFound(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_message_strips_prefixes() {
        let err = PipelineError::Stage {
            stage: "transform".into(),
            message: "dbt: compilation error in model stg_messages".into(),
        };
        assert_eq!(err.to_string(), "stage 'transform' failed: dbt: compilation error in model stg_messages");
        assert_eq!(err.root_message(), "dbt: compilation error in model stg_messages");

        let io = PipelineError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert_eq!(io.root_message(), "disk full");
    }

    #[test]
    fn test_flood_wait_display() {
        let err = SourceError::FloodWait(Duration::from_secs(30));
        assert_eq!(err.to_string(), "flood wait: source requires waiting 30s");
    }
}

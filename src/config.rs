use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::constants::MAX_PAGE_SIZE;
use crate::common::error::{PipelineError, Result};
use crate::domain::message::check_channel_name;

/// Runtime configuration, read from `pipeline.toml` and then overridden from the
/// environment. Every field has a default so a missing file is not an error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub paths: PathsConfig,
    pub fetch: FetchConfig,
    pub warehouse: WarehouseConfig,
    pub stages: StagesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root that attachment paths are recorded relative to
    pub data_root: PathBuf,
    pub landing_dir: PathBuf,
    pub images_dir: PathBuf,
    pub enrichment_dir: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub page_size: usize,
    pub request_timeout_secs: u64,
    pub max_concurrent_channels: usize,
    pub resume_from_checkpoint: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub busy_timeout_secs: u64,
}

/// External commands for the stages this crate does not implement itself
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub transform: Option<CommandConfig>,
    pub detector: Option<CommandConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            api_token: None,
            channels: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_root = PathBuf::from("data");
        Self {
            landing_dir: data_root.join("raw").join("telegram_messages"),
            images_dir: data_root.join("raw").join("images"),
            enrichment_dir: data_root.join("enrichment"),
            data_root,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            request_timeout_secs: 30,
            max_concurrent_channels: 1,
            resume_from_checkpoint: true,
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/warehouse.db"),
            checkpoint_path: PathBuf::from("data/fetch_state.db"),
            busy_timeout_secs: 5,
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load from `path` if it exists, then apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                PipelineError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SOURCE_BASE_URL") {
            self.source.base_url = url;
        }
        if let Some(token) = lookup("SOURCE_API_TOKEN") {
            self.source.api_token = Some(token);
        }
        if let Some(list) = lookup("CHANNELS") {
            self.source.channels = parse_channel_list(&list);
        }
        if let Some(root) = lookup("DATA_ROOT") {
            let root = PathBuf::from(root);
            self.paths.landing_dir = root.join("raw").join("telegram_messages");
            self.paths.images_dir = root.join("raw").join("images");
            self.paths.enrichment_dir = root.join("enrichment");
            self.warehouse.path = root.join("warehouse.db");
            self.warehouse.checkpoint_path = root.join("fetch_state.db");
            self.paths.data_root = root;
        }
        if let Some(path) = lookup("WAREHOUSE_PATH") {
            self.warehouse.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.page_size == 0 || self.fetch.page_size > MAX_PAGE_SIZE {
            return Err(PipelineError::Config(format!(
                "fetch.page_size must be in 1..={}, got {}",
                MAX_PAGE_SIZE, self.fetch.page_size
            )));
        }
        if self.fetch.request_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "fetch.request_timeout_secs must be finite and non-zero".into(),
            ));
        }
        if self.fetch.max_concurrent_channels == 0 {
            return Err(PipelineError::Config(
                "fetch.max_concurrent_channels must be at least 1".into(),
            ));
        }
        for channel in &self.source.channels {
            check_channel_name(channel).map_err(PipelineError::Config)?;
        }
        Ok(())
    }
}

/// Split a comma-separated channel list, dropping blanks and a leading '@'.
pub fn parse_channel_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().trim_start_matches('@').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.fetch.page_size, 100);
        assert_eq!(
            config.paths.landing_dir,
            PathBuf::from("data/raw/telegram_messages")
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            [source]
            channels = ["alpha", "beta"]

            [fetch]
            page_size = 50

            [stages.transform]
            program = "dbt"
            args = ["run"]
            working_dir = "medical_warehouse"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.channels, vec!["alpha", "beta"]);
        assert_eq!(config.fetch.page_size, 50);
        assert_eq!(config.fetch.request_timeout_secs, 30);
        let transform = config.stages.transform.unwrap();
        assert_eq!(transform.program, "dbt");
        assert_eq!(transform.args, vec!["run"]);
    }

    #[test]
    fn test_example_file_parses() {
        let config = Config::from_toml(include_str!("../pipeline.example.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.source.channels.len(), 2);
        assert_eq!(config.stages.transform.unwrap().args, vec!["run".to_string()]);
        assert!(config.stages.detector.unwrap().working_dir.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CHANNELS", "@alpha, beta ,,"),
            ("DATA_ROOT", "/tmp/tgw"),
            ("SOURCE_API_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.source.channels, vec!["alpha", "beta"]);
        assert_eq!(config.paths.images_dir, PathBuf::from("/tmp/tgw/raw/images"));
        assert_eq!(config.source.api_token.as_deref(), Some("secret"));
        assert_eq!(config.warehouse.path, PathBuf::from("/tmp/tgw/warehouse.db"));
        assert_eq!(
            config.warehouse.checkpoint_path,
            PathBuf::from("/tmp/tgw/fetch_state.db")
        );
    }

    #[test]
    fn test_warehouse_path_wins_over_data_root() {
        let vars: HashMap<&str, &str> = [
            ("DATA_ROOT", "/tmp/tgw"),
            ("WAREHOUSE_PATH", "/srv/wh.db"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.warehouse.path, PathBuf::from("/srv/wh.db"));
        assert_eq!(
            config.warehouse.checkpoint_path,
            PathBuf::from("/tmp/tgw/fetch_state.db")
        );
    }

    #[test]
    fn test_validate_rejects_unusable_channel_names() {
        for bad in [".alpha", "a\\b", "a/b"] {
            let mut config = Config::default();
            config.source.channels = vec!["beta".into(), bad.into()];
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains(bad), "{}", err);
        }
    }

    #[test]
    fn test_validate_rejects_oversized_page() {
        let mut config = Config::default();
        config.fetch.page_size = 500;
        assert!(config.validate().is_err());
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use channel_harvest::app::ports::{
    HistoryPage, MediaKind, MessageSource, ObjectDetector, RemoteMedia, RemoteMessage,
};
use channel_harvest::common::error::{PipelineError, SourceError};
use channel_harvest::config::{CommandConfig, Config};
use channel_harvest::infra::CommandDetector;
use channel_harvest::pipeline::warehouse::Warehouse;
use channel_harvest::pipeline::{PipelineOrchestrator, StageSelection};

/// In-memory channel: ids `total..=1`, newest first, every tenth message a photo.
struct FakeChannel {
    title: &'static str,
    total: i64,
    /// Ids divisible by this come back with a negative view counter
    bad_every: Option<i64>,
    requests: Mutex<Vec<Option<i64>>>,
}

impl FakeChannel {
    fn new(title: &'static str, total: i64) -> Self {
        Self {
            title,
            total,
            bad_every: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_bad_every(mut self, n: i64) -> Self {
        self.bad_every = Some(n);
        self
    }

    fn requests(&self) -> Vec<Option<i64>> {
        self.requests.lock().unwrap().clone()
    }

    fn message(&self, id: i64) -> RemoteMessage {
        let base: DateTime<FixedOffset> =
            DateTime::parse_from_rfc3339("2024-03-01T00:00:00+03:00").unwrap();
        RemoteMessage {
            id,
            date: base + ChronoDuration::minutes(10 * id),
            text: Some(format!("post {}", id)),
            views: match self.bad_every {
                Some(n) if id % n == 0 => Some(-1),
                _ => Some(id * 3),
            },
            forwards: None,
            media: (id % 10 == 0).then(|| RemoteMedia {
                kind: MediaKind::Photo,
                url: Some(format!("/media/{}", id)),
            }),
        }
    }
}

#[async_trait]
impl MessageSource for FakeChannel {
    async fn fetch_history(
        &self,
        channel: &str,
        offset_id: Option<i64>,
        limit: usize,
    ) -> Result<HistoryPage, SourceError> {
        if channel != "alpha" {
            return Err(SourceError::NotFound(channel.to_string()));
        }
        self.requests.lock().unwrap().push(offset_id);
        let start = offset_id.map(|o| o - 1).unwrap_or(self.total);
        let messages = (1..=start)
            .rev()
            .take(limit)
            .map(|id| self.message(id))
            .collect();
        Ok(HistoryPage {
            channel_title: self.title.to_string(),
            messages,
        })
    }

    async fn download_media(
        &self,
        _channel: &str,
        message: &RemoteMessage,
    ) -> Result<Vec<u8>, SourceError> {
        Ok(format!("jpeg-{}", message.id).into_bytes())
    }
}

fn config_in(root: &Path) -> Config {
    let mut config = Config::default();
    config.source.channels = vec!["alpha".to_string()];
    config.paths.data_root = root.to_path_buf();
    config.paths.landing_dir = root.join("raw").join("telegram_messages");
    config.paths.images_dir = root.join("raw").join("images");
    config.paths.enrichment_dir = root.join("enrichment");
    config.warehouse.path = root.join("warehouse.db");
    config.warehouse.checkpoint_path = root.join("fetch_state.db");
    config
}

fn landing_lines(root: &Path) -> usize {
    let mut lines = 0;
    for day in fs::read_dir(root).unwrap() {
        for file in fs::read_dir(day.unwrap().path()).unwrap() {
            lines += fs::read_to_string(file.unwrap().path()).unwrap().lines().count();
        }
    }
    lines
}

#[tokio::test]
async fn test_alpha_channel_scrape_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let source = Arc::new(FakeChannel::new("Alpha Pharmacy", 240));
    let orchestrator = PipelineOrchestrator::new(config.clone(), source.clone(), None);

    let selection = StageSelection::only(&["scrape", "load_raw"]).unwrap();
    let result = orchestrator.run(&selection).await.unwrap();

    // 100 + 100 + 40: the short last page ends the channel
    assert_eq!(source.requests(), vec![None, Some(141), Some(41)]);
    assert_eq!(landing_lines(&config.paths.landing_dir), 240);
    assert_eq!(result.stage("scrape").unwrap().succeeded, 1);
    assert_eq!(result.stage("load_raw").unwrap().succeeded, 240);
    assert_eq!(
        fs::read(config.paths.images_dir.join("alpha").join("120.jpg")).unwrap(),
        b"jpeg-120"
    );

    let reload = orchestrator
        .run(&StageSelection::only(&["load_raw"]).unwrap())
        .await
        .unwrap();
    let load = reload.stage("load_raw").unwrap();
    assert_eq!(load.succeeded, 0);
    assert_eq!(load.skipped, 240);

    let wh = Warehouse::open(&config.warehouse.path, Duration::from_secs(5)).unwrap();
    assert_eq!(wh.raw_message_count().unwrap(), 240);
}

#[tokio::test]
async fn test_rescrape_does_not_duplicate_warehouse_rows() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let source = Arc::new(FakeChannel::new("Alpha Pharmacy", 150));
    let orchestrator = PipelineOrchestrator::new(config.clone(), source, None);
    let selection = StageSelection::only(&["scrape", "load_raw"]).unwrap();

    orchestrator.run(&selection).await.unwrap();
    orchestrator.run(&selection).await.unwrap();

    // landing keeps both copies, the warehouse keeps one row per message
    assert_eq!(landing_lines(&config.paths.landing_dir), 300);
    let wh = Warehouse::open(&config.warehouse.path, Duration::from_secs(5)).unwrap();
    assert_eq!(wh.raw_message_count().unwrap(), 150);
}

#[tokio::test]
async fn test_unknown_channel_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.source.channels = vec!["ghost".to_string(), "alpha".to_string()];
    let orchestrator =
        PipelineOrchestrator::new(config, Arc::new(FakeChannel::new("Alpha", 30)), None);

    let result = orchestrator
        .run(&StageSelection::only(&["scrape"]).unwrap())
        .await
        .unwrap();
    let scrape = result.stage("scrape").unwrap();
    assert_eq!(scrape.attempted, 2);
    assert_eq!(scrape.succeeded, 1);
    assert_eq!(scrape.skipped, 1);
    assert!(scrape.message.contains("ghost"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_transform_failure_stops_downstream_stages() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.stages.transform = Some(CommandConfig {
        program: "sh".into(),
        args: vec![
            "-c".into(),
            "echo 'Compilation Error in model stg_telegram_messages' >&2; exit 1".into(),
        ],
        working_dir: None,
    });
    let detector = CommandDetector::new(CommandConfig {
        program: "sh".into(),
        args: vec!["-c".into(), "echo '[]'".into()],
        working_dir: None,
    });
    let orchestrator = PipelineOrchestrator::new(
        config.clone(),
        Arc::new(FakeChannel::new("Alpha", 20)),
        Some(Arc::new(detector) as Arc<dyn ObjectDetector>),
    );

    let err = orchestrator.run(&StageSelection::all()).await.unwrap_err();
    match err {
        PipelineError::Stage { stage, message } => {
            assert_eq!(stage, "transform");
            assert_eq!(message, "Compilation Error in model stg_telegram_messages");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // upstream stages ran, downstream ones never started
    let wh = Warehouse::open(&config.warehouse.path, Duration::from_secs(5)).unwrap();
    assert_eq!(wh.raw_message_count().unwrap(), 20);
    assert!(!config.paths.enrichment_dir.join("detections.jsonl").exists());
}

fn expect_stage_error(err: PipelineError, expected: &str) -> String {
    match err {
        PipelineError::Stage { stage, message } => {
            assert_eq!(stage, expected);
            message
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_warehouse_fails_load_stage_after_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let mut config = config_in(dir.path());
    config.warehouse.path = blocker.join("warehouse.db");
    let source = Arc::new(FakeChannel::new("Alpha", 20));
    let orchestrator = PipelineOrchestrator::new(config.clone(), source.clone(), None);

    let err = orchestrator.run(&StageSelection::all()).await.unwrap_err();
    expect_stage_error(err, "load_raw");

    // scrape finished before the warehouse was ever opened
    assert_eq!(source.requests(), vec![None]);
    assert_eq!(landing_lines(&config.paths.landing_dir), 20);
}

#[tokio::test]
async fn test_unwritable_landing_store_fails_scrape_stage() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let mut config = config_in(dir.path());
    config.paths.landing_dir = blocker.join("landing");
    let orchestrator =
        PipelineOrchestrator::new(config.clone(), Arc::new(FakeChannel::new("Alpha", 20)), None);

    let err = orchestrator.run(&StageSelection::all()).await.unwrap_err();
    expect_stage_error(err, "scrape");
    assert!(!config.warehouse.path.exists());
}

#[tokio::test]
async fn test_hidden_channel_name_is_rejected_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.source.channels = vec![".alpha".to_string()];
    assert!(config.validate().is_err());

    let source = Arc::new(FakeChannel::new("Alpha", 20));
    let orchestrator = PipelineOrchestrator::new(config, source.clone(), None);
    let err = orchestrator
        .run(&StageSelection::only(&["scrape"]).unwrap())
        .await
        .unwrap_err();

    let message = expect_stage_error(err, "scrape");
    assert!(message.contains(".alpha"), "{}", message);
    assert!(source.requests().is_empty());
}

#[tokio::test]
async fn test_invalid_messages_are_counted_in_scrape_result() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let source = Arc::new(FakeChannel::new("Alpha", 30).with_bad_every(7));
    let orchestrator = PipelineOrchestrator::new(config.clone(), source, None);

    let result = orchestrator
        .run(&StageSelection::only(&["scrape"]).unwrap())
        .await
        .unwrap();
    let scrape = result.stage("scrape").unwrap();

    // ids 7, 14, 21 and 28 are dropped, the channel still walked to the end
    assert_eq!(landing_lines(&config.paths.landing_dir), 26);
    assert_eq!(scrape.attempted, 1);
    assert_eq!(scrape.succeeded, 0);
    assert_eq!(scrape.skipped, 1);
    assert!(scrape.message.contains("4 invalid"), "{}", scrape.message);
}

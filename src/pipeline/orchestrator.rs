use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::ingestion::{AttachmentStore, ChannelFetcher, FetchCheckpoints, FetcherSettings, LandingWriter};
use super::pipeline_config::StageSelection;
use super::processing::EnrichmentRunner;
use super::steps::{
    EnrichStep, LoadEnrichmentStep, LoadRawStep, PipelineStep, ScrapeStep, StepResult,
    TransformStep,
};
use super::warehouse::{BulkLoader, EnrichmentLoader, PartitionScope, Warehouse};
use crate::app::ports::{MessageSource, ObjectDetector};
use crate::common::constants::{
    ENRICH_STAGE, LOAD_ENRICHMENT_STAGE, LOAD_RAW_STAGE, SCRAPE_STAGE, TRANSFORM_STAGE,
};
use crate::common::error::{PipelineError, Result};
use crate::config::Config;
use crate::infra::{CommandDetector, ExternalCommand, HttpMessageSource};
use crate::observability::metrics;

/// Name of the classification output inside the enrichment directory
pub const DETECTIONS_FILE: &str = "detections.jsonl";

/// Runs the fixed stage sequence scrape, load_raw, transform, enrich,
/// load_enrichment, stopping at the first failure.
pub struct PipelineOrchestrator {
    config: Config,
    source: Arc<dyn MessageSource>,
    detector: Option<Arc<dyn ObjectDetector>>,
    load_scope: PartitionScope,
    warehouse: Mutex<Option<Arc<Warehouse>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        source: Arc<dyn MessageSource>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Self {
        Self {
            config,
            source,
            detector,
            load_scope: PartitionScope::all(),
            warehouse: Mutex::new(None),
        }
    }

    /// Wire the HTTP source and, when configured, the command-based detector.
    pub fn from_config(config: Config) -> Result<Self> {
        let source = HttpMessageSource::from_config(&config.source, config.fetch.request_timeout())?;
        let detector = config
            .stages
            .detector
            .clone()
            .map(|cmd| Arc::new(CommandDetector::new(cmd)) as Arc<dyn ObjectDetector>);
        Ok(Self::new(config, Arc::new(source), detector))
    }

    /// Restrict the raw load stage to some partitions
    pub fn with_load_scope(mut self, scope: PartitionScope) -> Self {
        self.load_scope = scope;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the selected stages in order.
    ///
    /// The first stage that errors ends the run; later stages are not started and
    /// the returned error names the stage and carries the underlying message.
    ///
    /// Each stage is built right before it runs, so a stage whose setup fails
    /// (warehouse or checkpoint store unreachable) fails as that stage, after the
    /// stages ahead of it have finished.
    pub async fn run(&self, selection: &StageSelection) -> Result<PipelineExecutionResult> {
        run_stages(&selection.stages(), |name| self.create_step(name)).await
    }

    /// Create a stage instance from its name
    pub fn create_step(&self, name: &str) -> Result<Box<dyn PipelineStep>> {
        let paths = &self.config.paths;
        let step: Box<dyn PipelineStep> = match name {
            SCRAPE_STAGE => {
                let writer = Arc::new(LandingWriter::new(&paths.landing_dir));
                let mut fetcher = ChannelFetcher::new(
                    self.source.clone(),
                    writer,
                    self.attachments(),
                    FetcherSettings::from(&self.config.fetch),
                );
                if self.config.fetch.resume_from_checkpoint {
                    let checkpoints = FetchCheckpoints::open(&self.config.warehouse.checkpoint_path)?;
                    fetcher = fetcher.with_checkpoints(Arc::new(checkpoints));
                }
                Box::new(ScrapeStep::new(fetcher, self.config.source.channels.clone()))
            }
            LOAD_RAW_STAGE => Box::new(LoadRawStep::new(
                BulkLoader::new(self.warehouse()?, &paths.landing_dir),
                self.load_scope.clone(),
            )),
            TRANSFORM_STAGE => Box::new(TransformStep::new(
                self.config.stages.transform.clone().map(ExternalCommand::new),
            )),
            ENRICH_STAGE => Box::new(EnrichStep::new(self.detector.clone().map(|detector| {
                EnrichmentRunner::new(detector, self.attachments(), self.detections_path())
            }))),
            LOAD_ENRICHMENT_STAGE => Box::new(LoadEnrichmentStep::new(EnrichmentLoader::new(
                self.warehouse()?,
                self.detections_path(),
            ))),
            other => {
                return Err(PipelineError::Config(format!("unknown stage '{}'", other)));
            }
        };
        Ok(step)
    }

    fn attachments(&self) -> Arc<AttachmentStore> {
        Arc::new(AttachmentStore::new(
            &self.config.paths.data_root,
            &self.config.paths.images_dir,
        ))
    }

    fn detections_path(&self) -> std::path::PathBuf {
        self.config.paths.enrichment_dir.join(DETECTIONS_FILE)
    }

    /// One warehouse handle per orchestrator, opened on first use
    fn warehouse(&self) -> Result<Arc<Warehouse>> {
        let mut slot = self.warehouse.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(wh) = slot.as_ref() {
            return Ok(wh.clone());
        }
        let wh = Arc::new(Warehouse::open(
            &self.config.warehouse.path,
            Duration::from_secs(self.config.warehouse.busy_timeout_secs),
        )?);
        *slot = Some(wh.clone());
        Ok(wh)
    }
}

/// Build and execute `stages` in the given order under one run id.
///
/// `build` is called for a stage only once every stage before it succeeded. A
/// build or execute error stops the run as a failure of that stage.
pub async fn run_stages<F>(stages: &[&'static str], mut build: F) -> Result<PipelineExecutionResult>
where
    F: FnMut(&'static str) -> Result<Box<dyn PipelineStep>>,
{
    let mut result = PipelineExecutionResult::new();
    info!(run_id = %result.run_id, stages = stages.len(), "Starting pipeline run");

    for (index, &name) in stages.iter().enumerate() {
        let span = info_span!("stage", stage = name, run_id = %result.run_id);
        info!(parent: &span, "Executing stage {}/{}: {}", index + 1, stages.len(), name);

        let started = Instant::now();
        let outcome = match build(name) {
            Ok(step) => step.execute().instrument(span.clone()).await,
            Err(e) => Err(e),
        };
        let elapsed = started.elapsed().as_secs_f64();
        metrics::coordinator::stage_finished(name, outcome.is_ok(), elapsed);

        match outcome {
            Ok(step_result) => {
                info!(
                    parent: &span,
                    attempted = step_result.attempted,
                    succeeded = step_result.succeeded,
                    skipped = step_result.skipped,
                    "Stage '{}' completed: {}",
                    name,
                    step_result.message
                );
                result.stages.push((name.to_string(), step_result));
            }
            Err(e) => {
                error!(parent: &span, "Stage '{}' failed: {}", name, e);
                let remaining = stages.len() - index - 1;
                if remaining > 0 {
                    warn!("Skipping {} downstream stage(s)", remaining);
                }
                return Err(PipelineError::Stage {
                    stage: name.to_string(),
                    message: e.root_message(),
                });
            }
        }
    }

    result.complete();
    info!(
        run_id = %result.run_id,
        stages = result.stages.len(),
        "Pipeline run finished"
    );
    Ok(result)
}

/// Result of a pipeline run that completed every selected stage
#[derive(Debug, Clone)]
pub struct PipelineExecutionResult {
    pub run_id: Uuid,
    pub stages: Vec<(String, StepResult)>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineExecutionResult {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stages: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn stage(&self, name: &str) -> Option<&StepResult> {
        self.stages.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

impl Default for PipelineExecutionResult {
    fn default() -> Self {
        Self::new()
    }
}

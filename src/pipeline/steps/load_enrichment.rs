use async_trait::async_trait;
use std::sync::Arc;

use super::{PipelineStep, StepResult};
use crate::common::constants::LOAD_ENRICHMENT_STAGE;
use crate::common::error::Result;
use crate::pipeline::warehouse::EnrichmentLoader;

pub struct LoadEnrichmentStep {
    loader: Arc<EnrichmentLoader>,
}

impl LoadEnrichmentStep {
    pub fn new(loader: EnrichmentLoader) -> Self {
        Self {
            loader: Arc::new(loader),
        }
    }
}

#[async_trait]
impl PipelineStep for LoadEnrichmentStep {
    async fn execute(&self) -> Result<StepResult> {
        let loader = self.loader.clone();
        let report = tokio::task::spawn_blocking(move || loader.load()).await??;
        Ok(StepResult::success(
            report.attempted(),
            report.inserted,
            report.duplicates + report.skipped,
            format!(
                "{} inserted, {} duplicates, {} malformed",
                report.inserted, report.duplicates, report.skipped
            ),
        ))
    }

    fn step_name(&self) -> &'static str {
        LOAD_ENRICHMENT_STAGE
    }
}

use async_trait::async_trait;
use tracing::info;

use super::{PipelineStep, StepResult};
use crate::common::constants::ENRICH_STAGE;
use crate::common::error::Result;
use crate::pipeline::processing::EnrichmentRunner;

/// Classifies downloaded attachments with the object detector
pub struct EnrichStep {
    runner: Option<EnrichmentRunner>,
}

impl EnrichStep {
    pub fn new(runner: Option<EnrichmentRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PipelineStep for EnrichStep {
    async fn execute(&self) -> Result<StepResult> {
        let Some(runner) = &self.runner else {
            info!("No object detector configured, skipping enrichment");
            return Ok(StepResult::not_configured(
                "no object detector configured".into(),
            ));
        };

        let report = runner.run().await?;
        Ok(StepResult::success(
            report.images,
            report.classified,
            report.failed,
            format!(
                "{} of {} images classified into {}",
                report.classified,
                report.images,
                runner.output_path().display()
            ),
        ))
    }

    fn step_name(&self) -> &'static str {
        ENRICH_STAGE
    }
}

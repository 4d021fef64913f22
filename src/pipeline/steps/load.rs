use async_trait::async_trait;
use std::sync::Arc;

use super::{PipelineStep, StepResult};
use crate::common::constants::LOAD_RAW_STAGE;
use crate::common::error::Result;
use crate::pipeline::warehouse::{BulkLoader, PartitionScope};

/// Loads landing partitions into the raw messages table
pub struct LoadRawStep {
    loader: Arc<BulkLoader>,
    scope: PartitionScope,
}

impl LoadRawStep {
    pub fn new(loader: BulkLoader, scope: PartitionScope) -> Self {
        Self {
            loader: Arc::new(loader),
            scope,
        }
    }
}

#[async_trait]
impl PipelineStep for LoadRawStep {
    async fn execute(&self) -> Result<StepResult> {
        let loader = self.loader.clone();
        let scope = self.scope.clone();
        let report = tokio::task::spawn_blocking(move || loader.load(&scope)).await??;

        Ok(StepResult::success(
            report.attempted(),
            report.inserted,
            report.duplicates + report.skipped,
            format!(
                "{} files: {} inserted, {} duplicates, {} malformed",
                report.files, report.inserted, report.duplicates, report.skipped
            ),
        ))
    }

    fn step_name(&self) -> &'static str {
        LOAD_RAW_STAGE
    }
}

use async_trait::async_trait;

use crate::common::error::Result;

/// Common trait for all pipeline stages
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Run this stage to completion
    async fn execute(&self) -> Result<StepResult>;

    /// Name used for selection, logs and metrics
    fn step_name(&self) -> &'static str;
}

/// Count summary a stage ends with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub message: String,
}

impl StepResult {
    pub fn success(attempted: usize, succeeded: usize, skipped: usize, message: String) -> Self {
        Self {
            attempted,
            succeeded,
            skipped,
            message,
        }
    }

    /// A stage that had nothing configured to do
    pub fn not_configured(message: String) -> Self {
        Self::success(0, 0, 0, message)
    }
}

pub mod enrich;
pub mod load;
pub mod load_enrichment;
pub mod scrape;
pub mod transform;

pub use enrich::EnrichStep;
pub use load::LoadRawStep;
pub use load_enrichment::LoadEnrichmentStep;
pub use scrape::ScrapeStep;
pub use transform::TransformStep;

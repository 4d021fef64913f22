use async_trait::async_trait;
use tracing::{debug, info};

use super::{PipelineStep, StepResult};
use crate::common::constants::TRANSFORM_STAGE;
use crate::common::error::{PipelineError, Result};
use crate::infra::ExternalCommand;

/// Runs the warehouse transformation project (e.g. `dbt run`)
pub struct TransformStep {
    command: Option<ExternalCommand>,
}

impl TransformStep {
    pub fn new(command: Option<ExternalCommand>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PipelineStep for TransformStep {
    async fn execute(&self) -> Result<StepResult> {
        let Some(command) = &self.command else {
            info!("No transform command configured, skipping");
            return Ok(StepResult::not_configured(
                "no transform command configured".into(),
            ));
        };

        let output = command
            .run::<&str>(&[])
            .await
            .map_err(|message| PipelineError::Stage {
                stage: TRANSFORM_STAGE.to_string(),
                message,
            })?;
        debug!(stdout = %output.stdout, "Transform output");
        Ok(StepResult::success(
            1,
            1,
            0,
            format!("'{}' finished", command.program()),
        ))
    }

    fn step_name(&self) -> &'static str {
        TRANSFORM_STAGE
    }
}

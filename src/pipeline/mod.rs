// Data pipeline: ingestion, warehouse loading, enrichment and the stage coordinator

pub mod ingestion;
pub mod orchestrator;
pub mod pipeline_config;
pub mod processing;
pub mod steps;
pub mod warehouse;

pub use orchestrator::{run_stages, PipelineExecutionResult, PipelineOrchestrator};
pub use pipeline_config::StageSelection;

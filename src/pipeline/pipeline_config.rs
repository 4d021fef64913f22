use crate::common::constants::{is_known_stage, STAGE_ORDER};
use crate::common::error::{PipelineError, Result};

/// Which stages a run executes. Selection never changes the relative order of
/// stages, it only drops some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSelection {
    only: Option<Vec<&'static str>>,
    from: Option<&'static str>,
}

impl StageSelection {
    /// Every stage, in order
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from operator input. `only` restricts to the named stages; `from`
    /// starts at the named stage. Both may be combined.
    pub fn new(only: &[String], from: Option<&str>) -> Result<Self> {
        let only = if only.is_empty() {
            None
        } else {
            Some(
                only.iter()
                    .map(|name| canonical_stage(name))
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        let from = from.map(canonical_stage).transpose()?;
        let selection = Self { only, from };
        if selection.stages().is_empty() {
            return Err(PipelineError::Config(
                "stage selection does not include any stage".into(),
            ));
        }
        Ok(selection)
    }

    pub fn only(names: &[&str]) -> Result<Self> {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        Self::new(&names, None)
    }

    pub fn starting_from(name: &str) -> Result<Self> {
        Self::new(&[], Some(name))
    }

    /// The selected stage names, in run order
    pub fn stages(&self) -> Vec<&'static str> {
        let start = self
            .from
            .and_then(|from| STAGE_ORDER.iter().position(|s| *s == from))
            .unwrap_or(0);
        STAGE_ORDER[start..]
            .iter()
            .copied()
            .filter(|stage| match &self.only {
                Some(only) => only.contains(stage),
                None => true,
            })
            .collect()
    }
}

/// Resolve a stage name as typed by an operator (`load-raw` and `load_raw` both
/// work) to its canonical constant.
fn canonical_stage(name: &str) -> Result<&'static str> {
    let normalized = name.trim().replace('-', "_");
    if !is_known_stage(&normalized) {
        return Err(PipelineError::Config(format!(
            "unknown stage '{}' (expected one of: {})",
            name,
            STAGE_ORDER.join(", ")
        )));
    }
    STAGE_ORDER
        .iter()
        .copied()
        .find(|s| *s == normalized)
        .ok_or_else(|| PipelineError::Config(format!("unknown stage '{}'", name)))
}

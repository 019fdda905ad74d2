//! Serializable snapshots of generation strategies.

use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::generation::{GenerationStepConfig, GenerationStrategy};
use crate::schema::{GeneratorRun, StepSettings};

/// Everything needed to rebuild a generation strategy mid-optimization.
///
/// Fitted models are not stored. The restored strategy re-fits on its next
/// `generate` call, seeding the model with the state recorded on the last
/// generator run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategySnapshot {
    pub name: String,
    pub current_step: usize,
    pub steps: Vec<StepSettings>,
    /// Generator runs in the order they were produced.
    #[serde(default)]
    pub generator_runs: Vec<GeneratorRun>,
    #[serde(default)]
    pub experiment_name: Option<String>,
}

impl GenerationStrategy {
    /// Capture the persistable state of this strategy.
    ///
    /// Fails for strategies using factory models or criteria that have no
    /// serializable form.
    pub fn to_snapshot(&self) -> Result<StrategySnapshot, StorageError> {
        if self.uses_non_registered_models() {
            return Err(StorageError::Unsupported(format!(
                "Generation strategy {} uses models defined via factory functions and cannot be stored",
                self.name()
            )));
        }
        let steps = self
            .steps()
            .iter()
            .map(|step| {
                step.config().to_settings().ok_or_else(|| {
                    StorageError::Unsupported(format!(
                        "Step #{} ({}) has a completion criterion without a stored form",
                        step.index(),
                        step.model_name()
                    ))
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(StrategySnapshot {
            name: self.name().to_string(),
            current_step: self.current_step_index(),
            steps,
            generator_runs: self.generator_runs().to_vec(),
            experiment_name: self.experiment_name().map(str::to_string),
        })
    }

    /// Rebuild a strategy from a snapshot.
    pub fn from_snapshot(snapshot: &StrategySnapshot) -> Result<Self, StorageError> {
        let steps = snapshot
            .steps
            .iter()
            .cloned()
            .map(GenerationStepConfig::from)
            .collect();
        let mut strategy = GenerationStrategy::new(steps, Some(snapshot.name.clone()))?;
        strategy.restore(
            snapshot.current_step,
            snapshot.generator_runs.clone(),
            snapshot.experiment_name.clone(),
        )?;
        Ok(strategy)
    }
}

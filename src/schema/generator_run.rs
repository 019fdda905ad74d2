//! Generator runs: batches of arms produced by one model generation call.

use serde::{Deserialize, Serialize};

use super::Arm;

/// Keyword arguments for model construction, generation and cross-validation.
pub type ModelKwargs = serde_json::Map<String, serde_json::Value>;

/// Merge two kwarg maps; entries in `overrides` win.
pub fn merge_kwargs(base: &ModelKwargs, overrides: &ModelKwargs) -> ModelKwargs {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// One batch of arms produced by a single call to a model's generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorRun {
    /// Proposed arms.
    pub arms: Vec<Arm>,
    /// Key of the model that produced the run.
    pub model_key: String,
    /// Index of the generation step that produced the run.
    #[serde(default)]
    pub generation_step_index: Option<usize>,
    /// Model state recorded after generation, used to warm-start a re-fit.
    #[serde(default)]
    pub model_state_after_gen: Option<ModelKwargs>,
}

impl GeneratorRun {
    pub fn new(arms: Vec<Arm>, model_key: impl Into<String>) -> Self {
        Self {
            arms,
            model_key: model_key.into(),
            generation_step_index: None,
            model_state_after_gen: None,
        }
    }

    /// Attach recorded model state.
    pub fn with_model_state(mut self, state: Option<ModelKwargs>) -> Self {
        self.model_state_after_gen = state;
        self
    }
}

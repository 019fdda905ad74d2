//! Errors raised while generating candidates.

use crate::models::ModelError;
use crate::schema::ConfigError;

/// Errors from the generation core.
///
/// `DataRequired` and `MaxParallelismReached` are recoverable: the caller
/// should wait for more trials to finish and try again. `Completed` is not a
/// failure; it signals that the strategy has no more work to do.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    DataRequired(String),
    #[error(
        "Maximum parallelism for generation step #{step_index} ({model_name}) has been reached: {num_running} trials are currently running. Mark some trials completed, failed or abandoned before generating more."
    )]
    MaxParallelismReached {
        step_index: usize,
        model_name: String,
        num_running: usize,
    },
    #[error(
        "The generator produced duplicate arms on all {max_draws} draws. The search space is likely exhausted or the model has converged."
    )]
    RepeatedPoints { max_draws: usize },
    #[error("{0}")]
    Completed(String),
    #[error("{0}")]
    Unsupported(String),
    #[error(
        "This generation strategy has been used for experiment {bound} so far; cannot reset experiment to {given}. Create a new generation strategy for a new optimization."
    )]
    ExperimentMismatch { bound: String, given: String },
    #[error("Cannot select among multiple model specs without a best model selector")]
    CannotSelectModel,
    #[error("No generator runs could be produced")]
    NoGeneratorRuns,
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl GenerationError {
    /// Whether this is the completion signal rather than a failure.
    pub fn is_completed(&self) -> bool {
        matches!(self, GenerationError::Completed(_))
    }

    /// Whether the caller should wait for trials to finish and retry.
    pub fn is_wait_and_retry(&self) -> bool {
        matches!(
            self,
            GenerationError::DataRequired(_) | GenerationError::MaxParallelismReached { .. }
        )
    }
}

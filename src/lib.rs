//! stepwise-gen - Stepwise generation strategies for sequential optimization.
//!
//! A generation strategy decides, trial by trial, which model proposes the
//! next candidates. It walks an ordered list of steps: each step generates
//! from one model for a budget of trials, and the strategy moves on once the
//! budget is spent and enough trials have been observed.
//!
//! # Architecture
//!
//! - `schema`: Data and configuration types (search spaces, arms, data, runs)
//! - `experiment`: The trial bookkeeping the strategy reads from
//! - `models`: Built-in models and cross-validation based model selection
//! - `generation`: Model specs, nodes, steps and the strategy state machine
//! - `storage`: JSON snapshots of experiments and strategies
//!
//! # Example
//!
//! ```rust,no_run
//! use stepwise_gen::{
//!     experiment::{Experiment, Metric},
//!     generation::{GenOptions, GenerationStepConfig, GenerationStrategy},
//!     schema::{ModelRegistry, RangeParameter, SearchSpace},
//! };
//!
//! let mut experiment = Experiment::new(
//!     "demo",
//!     SearchSpace::new(vec![RangeParameter::float("x", 0.0, 1.0)]),
//! )
//! .with_metric(Metric::new("objective"));
//!
//! let mut strategy = GenerationStrategy::new(
//!     vec![
//!         GenerationStepConfig::new(ModelRegistry::Uniform, 5).min_trials_observed(3),
//!         GenerationStepConfig::new(ModelRegistry::LocalSearch, -1),
//!     ],
//!     None,
//! )?;
//!
//! let run = strategy.generate(&experiment, None, GenOptions::new())?;
//! let trial = experiment.new_trial(&run);
//! experiment.mark_running(trial)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod experiment;
pub mod generation;
pub mod models;
pub mod schema;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use experiment::{Experiment, ExperimentView};
pub use generation::{GenOptions, GenerationError, GenerationStepConfig, GenerationStrategy};
pub use schema::{RunConfig, StepSettings, StrategyConfig};

//! Configuration types for generation strategies and CLI runs.

use serde::{Deserialize, Serialize};

use super::{ModelKwargs, ParameterType, RangeParameter, SearchSpace, TrialStatus};

/// Built-in models that can be referenced by name and therefore persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModelRegistry {
    /// Seeded uniform random sampling over the search space.
    Uniform,
    /// Gaussian perturbation around the best observed arm.
    LocalSearch,
}

impl ModelRegistry {
    /// Stable key used for model names and persisted generator runs.
    pub fn key(self) -> &'static str {
        match self {
            ModelRegistry::Uniform => "Uniform",
            ModelRegistry::LocalSearch => "LocalSearch",
        }
    }
}

/// Persistable completion criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum CriterionSettings {
    /// Met once at least `threshold` trials of the experiment are in `status`.
    MinimumTrialsInStatus { status: TrialStatus, threshold: usize },
}

/// Declarative definition of one generation step using a registered model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSettings {
    /// Model to generate from.
    pub model: ModelRegistry,
    /// Trial budget; -1 means unlimited.
    pub num_trials: i64,
    /// Completed trials required before the strategy may advance.
    #[serde(default)]
    pub min_trials_observed: usize,
    /// Maximum number of this step's trials running at once.
    #[serde(default)]
    pub max_parallelism: Option<usize>,
    /// Update the fitted model with new data instead of re-fitting.
    #[serde(default)]
    pub use_update: bool,
    /// Refuse to generate past `num_trials`.
    #[serde(default = "default_enforce_num_trials")]
    pub enforce_num_trials: bool,
    /// Re-draw generator runs containing arms already on the experiment.
    #[serde(default)]
    pub should_deduplicate: bool,
    /// Model construction kwargs.
    #[serde(default)]
    pub model_kwargs: ModelKwargs,
    /// Model generation kwargs.
    #[serde(default)]
    pub model_gen_kwargs: ModelKwargs,
    /// All must be met before leaving an unlimited step.
    #[serde(default)]
    pub completion_criteria: Vec<CriterionSettings>,
    /// Display name; defaults to the model key.
    #[serde(default)]
    pub model_name: Option<String>,
}

impl StepSettings {
    /// Settings with default policy for the given model and budget.
    pub fn new(model: ModelRegistry, num_trials: i64) -> Self {
        Self {
            model,
            num_trials,
            min_trials_observed: 0,
            max_parallelism: None,
            use_update: false,
            enforce_num_trials: default_enforce_num_trials(),
            should_deduplicate: false,
            model_kwargs: ModelKwargs::new(),
            model_gen_kwargs: ModelKwargs::new(),
            completion_criteria: Vec::new(),
            model_name: None,
        }
    }
}

fn default_enforce_num_trials() -> bool {
    true
}

/// Declarative definition of a generation strategy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    /// Display name; defaults to step model names joined with `+`.
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<StepSettings>,
}

/// Synthetic objective used by the CLI runner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type")]
pub enum BenchmarkFunction {
    /// Sum of squared distances from the centre of the search space.
    #[default]
    Sphere,
    /// Branin function on the first two parameters.
    Branin,
    /// Rosenbrock function over all parameters.
    Rosenbrock,
}

impl BenchmarkFunction {
    /// Evaluate at `values`, given in search space parameter order.
    pub fn evaluate(self, space: &SearchSpace, values: &[f64]) -> f64 {
        match self {
            BenchmarkFunction::Sphere => space
                .parameters
                .iter()
                .zip(values)
                .map(|(p, v)| (v - (p.lower + p.upper) / 2.0).powi(2))
                .sum(),
            BenchmarkFunction::Branin => {
                let x1 = values.first().copied().unwrap_or(0.0);
                let x2 = values.get(1).copied().unwrap_or(0.0);
                let b = 5.1 / (4.0 * std::f64::consts::PI.powi(2));
                let c = 5.0 / std::f64::consts::PI;
                let t = 1.0 / (8.0 * std::f64::consts::PI);
                (x2 - b * x1.powi(2) + c * x1 - 6.0).powi(2) + 10.0 * (1.0 - t) * x1.cos() + 10.0
            }
            BenchmarkFunction::Rosenbrock => values
                .windows(2)
                .map(|w| 100.0 * (w[1] - w[0].powi(2)).powi(2) + (1.0 - w[0]).powi(2))
                .sum(),
        }
    }
}

/// Experiment definition for a CLI run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name; strategies bind to it.
    pub name: String,
    pub search_space: SearchSpace,
    /// Function evaluated for each arm.
    #[serde(default)]
    pub benchmark: BenchmarkFunction,
    /// Metric name the benchmark value is reported under.
    #[serde(default = "default_objective")]
    pub objective: String,
    /// Standard deviation of Gaussian observation noise.
    #[serde(default)]
    pub noise_sd: f64,
}

fn default_objective() -> String {
    "objective".to_string()
}

/// Top-level configuration for the CLI runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub experiment: ExperimentConfig,
    pub strategy: StrategyConfig,
    /// Stop after this many trials even if the strategy has not completed.
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,
    /// Largest number of trials requested per scheduling round.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Random seed injected into models that do not set one.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

fn default_max_trials() -> usize {
    30
}
fn default_batch_size() -> usize {
    3
}

impl Default for RunConfig {
    fn default() -> Self {
        let mut uniform = StepSettings::new(ModelRegistry::Uniform, 6);
        uniform.min_trials_observed = 3;

        let mut local = StepSettings::new(ModelRegistry::LocalSearch, -1);
        local.max_parallelism = Some(3);
        local.use_update = true;
        local.should_deduplicate = true;

        Self {
            experiment: ExperimentConfig {
                name: "branin".to_string(),
                search_space: SearchSpace::new(vec![
                    RangeParameter::float("x1", -5.0, 10.0),
                    RangeParameter::float("x2", 0.0, 15.0),
                ]),
                benchmark: BenchmarkFunction::Branin,
                objective: default_objective(),
                noise_sd: 0.0,
            },
            strategy: StrategyConfig {
                name: None,
                steps: vec![uniform, local],
            },
            max_trials: default_max_trials(),
            batch_size: default_batch_size(),
            random_seed: None,
        }
    }
}

impl RunConfig {
    /// Validate the parts of the run that are not checked by strategy construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.experiment.search_space.validate()?;
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidRun("batch_size must be positive".into()));
        }
        if self.experiment.noise_sd < 0.0 {
            return Err(ConfigError::InvalidRun(format!(
                "noise_sd ({}) must be non-negative",
                self.experiment.noise_sd
            )));
        }
        if self.experiment.benchmark == BenchmarkFunction::Branin
            && self.experiment.search_space.dimension() < 2
        {
            return Err(ConfigError::InvalidRun(
                "Branin needs at least two parameters".into(),
            ));
        }
        if self
            .experiment
            .search_space
            .parameters
            .iter()
            .any(|p| {
                p.parameter_type == ParameterType::Int
                    && (p.lower.fract() != 0.0 || p.upper.fract() != 0.0)
            })
        {
            return Err(ConfigError::InvalidBounds(
                "integer parameters need whole-number bounds".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "min_trials_observed ({min_trials_observed}) > num_trials ({num_trials}) makes completing the step impossible"
    )]
    MinObservedExceedsBudget {
        min_trials_observed: usize,
        num_trials: i64,
    },
    #[error(
        "Only the last step may have num_trials = -1 without completion criteria (step {index})"
    )]
    UnlimitedNonFinalStep { index: usize },
    #[error("num_trials must be positive or -1 (unlimited), got {num_trials} for step {index}")]
    InvalidNumTrials { index: usize, num_trials: i64 },
    #[error("max_parallelism must be unset or positive, got {max_parallelism} for step {model_name}")]
    InvalidMaxParallelism {
        model_name: String,
        max_parallelism: usize,
    },
    #[error("A generation strategy needs at least one step")]
    NoSteps,
    #[error("A generation node needs at least one model spec")]
    NoModelSpecs,
    #[error("Search space has no parameters")]
    EmptySearchSpace,
    #[error("Invalid parameter bounds: {0}")]
    InvalidBounds(String),
    #[error("Duplicate parameter name: {0}")]
    DuplicateParameter(String),
    #[error("Invalid run configuration: {0}")]
    InvalidRun(String),
}

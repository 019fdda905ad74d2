//! Generation steps: a single-model node with a trial budget and advancement rules.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::{
    CompletionCriterion, GenOptions, GenerationError, GenerationNode, ModelSource, ModelSpec,
};
use crate::experiment::ExperimentView;
use crate::models::Model;
use crate::schema::{ConfigError, Data, GeneratorRun, ModelKwargs, StepSettings, TrialStatus};

/// Plain definition of a generation step, before it is numbered and bound
/// into a strategy.
#[derive(Debug, Clone)]
pub struct GenerationStepConfig {
    pub model: ModelSource,
    /// Trial budget; -1 means unlimited.
    pub num_trials: i64,
    pub min_trials_observed: usize,
    pub max_parallelism: Option<usize>,
    pub use_update: bool,
    pub enforce_num_trials: bool,
    pub should_deduplicate: bool,
    pub model_kwargs: ModelKwargs,
    pub model_gen_kwargs: ModelKwargs,
    pub completion_criteria: Vec<Arc<dyn CompletionCriterion>>,
    pub model_name: Option<String>,
}

impl GenerationStepConfig {
    pub fn new(model: impl Into<ModelSource>, num_trials: i64) -> Self {
        Self {
            model: model.into(),
            num_trials,
            min_trials_observed: 0,
            max_parallelism: None,
            use_update: false,
            enforce_num_trials: true,
            should_deduplicate: false,
            model_kwargs: ModelKwargs::new(),
            model_gen_kwargs: ModelKwargs::new(),
            completion_criteria: Vec::new(),
            model_name: None,
        }
    }

    pub fn min_trials_observed(mut self, min_trials_observed: usize) -> Self {
        self.min_trials_observed = min_trials_observed;
        self
    }

    pub fn max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = Some(max_parallelism);
        self
    }

    pub fn use_update(mut self, use_update: bool) -> Self {
        self.use_update = use_update;
        self
    }

    pub fn enforce_num_trials(mut self, enforce: bool) -> Self {
        self.enforce_num_trials = enforce;
        self
    }

    pub fn should_deduplicate(mut self, should_deduplicate: bool) -> Self {
        self.should_deduplicate = should_deduplicate;
        self
    }

    pub fn model_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.model_kwargs = kwargs;
        self
    }

    pub fn model_gen_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.model_gen_kwargs = kwargs;
        self
    }

    pub fn completion_criterion(mut self, criterion: impl CompletionCriterion + 'static) -> Self {
        self.completion_criteria.push(Arc::new(criterion));
        self
    }

    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    /// Persistable form; `None` for factory models or criteria without one.
    pub fn to_settings(&self) -> Option<StepSettings> {
        let ModelSource::Registered(model) = &self.model else {
            return None;
        };
        Some(StepSettings {
            model: *model,
            num_trials: self.num_trials,
            min_trials_observed: self.min_trials_observed,
            max_parallelism: self.max_parallelism,
            use_update: self.use_update,
            enforce_num_trials: self.enforce_num_trials,
            should_deduplicate: self.should_deduplicate,
            model_kwargs: self.model_kwargs.clone(),
            model_gen_kwargs: self.model_gen_kwargs.clone(),
            completion_criteria: self
                .completion_criteria
                .iter()
                .map(|c| c.to_settings())
                .collect::<Option<_>>()?,
            model_name: self.model_name.clone(),
        })
    }

    /// Checks that depend only on this step.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enforce_num_trials
            && self.num_trials >= 0
            && self.min_trials_observed as i64 > self.num_trials
        {
            return Err(ConfigError::MinObservedExceedsBudget {
                min_trials_observed: self.min_trials_observed,
                num_trials: self.num_trials,
            });
        }
        Ok(())
    }
}

impl From<StepSettings> for GenerationStepConfig {
    fn from(settings: StepSettings) -> Self {
        Self {
            model: ModelSource::Registered(settings.model),
            num_trials: settings.num_trials,
            min_trials_observed: settings.min_trials_observed,
            max_parallelism: settings.max_parallelism,
            use_update: settings.use_update,
            enforce_num_trials: settings.enforce_num_trials,
            should_deduplicate: settings.should_deduplicate,
            model_kwargs: settings.model_kwargs,
            model_gen_kwargs: settings.model_gen_kwargs,
            completion_criteria: settings
                .completion_criteria
                .iter()
                .map(|c| c.build())
                .collect(),
            model_name: settings.model_name,
        }
    }
}

/// A numbered step of a generation strategy.
///
/// Trial accounting reads the experiment passed to each call; a step holds
/// no reference to its strategy or experiment.
#[derive(Debug)]
pub struct GenerationStep {
    config: GenerationStepConfig,
    index: usize,
    model_name: String,
    node: GenerationNode,
}

impl GenerationStep {
    /// Validate `config` and number it as step `index`.
    pub fn new(config: GenerationStepConfig, index: usize) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::materialize(config, index))
    }

    /// Build without validation, for configs that were validated before.
    pub(crate) fn materialize(config: GenerationStepConfig, index: usize) -> Self {
        let spec = ModelSpec::new(config.model.clone())
            .with_model_kwargs(config.model_kwargs.clone())
            .with_model_gen_kwargs(config.model_gen_kwargs.clone());
        let model_name = config
            .model_name
            .clone()
            .unwrap_or_else(|| spec.model_key().to_string());
        let node = GenerationNode::single(spec, config.should_deduplicate);
        Self {
            config,
            index,
            model_name,
            node,
        }
    }

    pub fn config(&self) -> &GenerationStepConfig {
        &self.config
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn num_trials(&self) -> i64 {
        self.config.num_trials
    }

    pub fn min_trials_observed(&self) -> usize {
        self.config.min_trials_observed
    }

    pub fn max_parallelism(&self) -> Option<usize> {
        self.config.max_parallelism
    }

    pub fn use_update(&self) -> bool {
        self.config.use_update
    }

    pub fn enforce_num_trials(&self) -> bool {
        self.config.enforce_num_trials
    }

    pub fn completion_criteria(&self) -> &[Arc<dyn CompletionCriterion>] {
        &self.config.completion_criteria
    }

    pub fn node(&self) -> &GenerationNode {
        &self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut GenerationNode {
        &mut self.node
    }

    pub fn model_spec(&self) -> &ModelSpec {
        &self.node.model_specs()[0]
    }

    pub fn fitted_model(&self) -> Option<&dyn Model> {
        self.model_spec().fitted_model()
    }

    /// Trials of the experiment grouped by the step that produced them, for
    /// this step and all earlier ones.
    pub fn trial_indices(
        &self,
        experiment: &dyn ExperimentView,
    ) -> BTreeMap<usize, BTreeSet<usize>> {
        let mut by_step: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for trial in experiment.trial_summaries() {
            if let Some(step) = trial.generation_step_index
                && step <= self.index
            {
                by_step.entry(step).or_default().insert(trial.index);
            }
        }
        by_step
    }

    fn own_trials(&self, experiment: &dyn ExperimentView) -> BTreeSet<usize> {
        self.trial_indices(experiment)
            .remove(&self.index)
            .unwrap_or_default()
    }

    /// This step's trials, excluding failed and abandoned ones.
    pub fn num_can_complete(&self, experiment: &dyn ExperimentView) -> usize {
        let by_status = experiment.trial_indices_by_status();
        let will_not_complete =
            by_status.with_any_status(&[TrialStatus::Failed, TrialStatus::Abandoned]);
        self.own_trials(experiment)
            .difference(&will_not_complete)
            .count()
    }

    /// This step's trials that are completed or early-stopped.
    pub fn num_completed(&self, experiment: &dyn ExperimentView) -> usize {
        let by_status = experiment.trial_indices_by_status();
        let completed =
            by_status.with_any_status(&[TrialStatus::Completed, TrialStatus::EarlyStopped]);
        self.own_trials(experiment).intersection(&completed).count()
    }

    /// This step's trials that are running.
    pub fn num_running_trials(&self, experiment: &dyn ExperimentView) -> usize {
        experiment
            .trial_summaries()
            .iter()
            .filter(|t| t.generation_step_index == Some(self.index) && t.status.is_running())
            .count()
    }

    /// `(left_to_generate, left_to_complete)`, or `(-1, -1)` for an unlimited step.
    pub fn num_trials_to_gen_and_complete(&self, experiment: &dyn ExperimentView) -> (i64, i64) {
        if self.config.num_trials == -1 {
            return (-1, -1);
        }
        // Either count may overshoot its target when the budget is not enforced.
        let left_to_gen =
            (self.config.num_trials - self.num_can_complete(experiment) as i64).max(0);
        let left_to_complete = (self.config.min_trials_observed as i64
            - self.num_completed(experiment) as i64)
            .max(0);
        (left_to_gen, left_to_complete)
    }

    /// Trials that can still start before hitting `max_parallelism`, or `None` without a cap.
    pub fn num_remaining_trials_until_max_parallelism(
        &self,
        experiment: &dyn ExperimentView,
        raise_on_exceeded: bool,
    ) -> Result<Option<usize>, GenerationError> {
        let Some(max_parallelism) = self.config.max_parallelism else {
            return Ok(None);
        };
        let num_running = self.num_running_trials(experiment);
        if raise_on_exceeded && num_running >= max_parallelism {
            return Err(GenerationError::MaxParallelismReached {
                step_index: self.index,
                model_name: self.model_name.clone(),
                num_running,
            });
        }
        Ok(Some(max_parallelism.saturating_sub(num_running)))
    }

    /// Data to fit this step's model with.
    ///
    /// Without `passed_in_data`, looks up all experiment data, or only data
    /// for completed trials when the step uses `update`.
    pub fn get_data_for_fit(
        &self,
        experiment: &dyn ExperimentView,
        passed_in_data: Option<&Data>,
        previous_step_required_observations: bool,
    ) -> Result<Data, GenerationError> {
        let data = match passed_in_data {
            Some(data) => data.clone(),
            None if self.config.use_update => {
                let available_while_running: Vec<&str> = experiment
                    .metrics()
                    .iter()
                    .filter(|m| m.available_while_running)
                    .map(|m| m.name.as_str())
                    .collect();
                if !available_while_running.is_empty() {
                    return Err(GenerationError::Unsupported(format!(
                        "Metrics {available_while_running:?} are available while trials are running, but `use_update` relies on new data arriving when trials complete"
                    )));
                }
                let completed = experiment
                    .trial_indices_by_status()
                    .with_status(TrialStatus::Completed)
                    .clone();
                experiment.lookup_data(Some(&completed))
            }
            None => experiment.lookup_data(None),
        };

        if data.is_empty() && previous_step_required_observations {
            return Err(GenerationError::DataRequired(format!(
                "Observed data is required for generation step #{} (model {}), but fetched data was empty. Check that data is attached to the experiment for completed trials.",
                self.index, self.model_name
            )));
        }
        Ok(data)
    }

    /// Fit the step's model.
    pub fn fit(
        &mut self,
        experiment: &dyn ExperimentView,
        data: &Data,
        kwargs: &ModelKwargs,
    ) -> Result<(), GenerationError> {
        self.node.fit(experiment, data, None, kwargs)
    }

    /// Update the already fitted model with new data.
    pub fn update(
        &mut self,
        experiment: &dyn ExperimentView,
        new_data: &Data,
    ) -> Result<(), GenerationError> {
        for spec in self.node.model_specs_mut() {
            spec.update(experiment, new_data)?;
        }
        Ok(())
    }

    /// Generate one batch, tagged with this step's index.
    pub fn generate(&mut self, options: GenOptions<'_>) -> Result<GeneratorRun, GenerationError> {
        let mut run = self.node.generate(options)?;
        run.generation_step_index = Some(self.index);
        Ok(run)
    }
}

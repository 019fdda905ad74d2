//! The generation strategy: a sequence of steps driven as a state machine.

use std::collections::BTreeSet;
use std::fmt;

use super::{GenOptions, GenerationError, GenerationStep, GenerationStepConfig};
use crate::experiment::ExperimentView;
use crate::models::Model;
use crate::schema::{
    ConfigError, Data, GeneratorRun, ModelKwargs, ObservationFeatures, Parameterization,
    PendingObservations, StrategyConfig, TrialIndicesByStatus, TrialStatus,
};

/// One row of [`GenerationStrategy::trials_summary`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSummaryRow {
    pub step_index: usize,
    pub model_name: String,
    pub trial_index: usize,
    pub status: TrialStatus,
    /// Arm name and parameters for each arm of the trial.
    pub arms: Vec<(String, Parameterization)>,
}

impl fmt::Display for TrialSummaryRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<5} {:<12} {:<6} {:<14}",
            self.step_index, self.model_name, self.trial_index, self.status
        )?;
        for (name, parameters) in &self.arms {
            let values: Vec<String> = parameters
                .iter()
                .map(|(k, v)| format!("{k}={v:.2}"))
                .collect();
            write!(f, " {name}:{{{}}}", values.join(", "))?;
        }
        Ok(())
    }
}

/// Decides which model generates the next candidates, and when to move on.
///
/// The strategy starts at step 0 and only ever moves forward. A step is left
/// once its budget has been generated and its minimum number of trials has
/// been observed; an unlimited step is left once all of its completion
/// criteria are met. Leaving the last step completes the strategy.
///
/// Each strategy serves a single experiment, identified by name.
#[derive(Debug)]
pub struct GenerationStrategy {
    name: String,
    steps: Vec<GenerationStep>,
    curr: usize,
    experiment_name: Option<String>,
    generator_runs: Vec<GeneratorRun>,
    /// Whether the current step holds a model fitted in this session.
    has_model: bool,
    seen_trial_indices_by_status: Option<TrialIndicesByStatus>,
    uses_registered_models: bool,
}

impl GenerationStrategy {
    /// Validate and number `steps`.
    pub fn new(
        steps: Vec<GenerationStepConfig>,
        name: Option<String>,
    ) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }
        let last = steps.len() - 1;
        let mut materialized = Vec::with_capacity(steps.len());
        for (index, config) in steps.into_iter().enumerate() {
            if config.num_trials == -1 && config.completion_criteria.is_empty() {
                if index < last {
                    return Err(ConfigError::UnlimitedNonFinalStep { index });
                }
            } else if config.num_trials < 1 && config.num_trials != -1 {
                return Err(ConfigError::InvalidNumTrials {
                    index,
                    num_trials: config.num_trials,
                });
            }
            let step = GenerationStep::new(config, index)?;
            if let Some(max_parallelism) = step.max_parallelism()
                && max_parallelism < 1
            {
                return Err(ConfigError::InvalidMaxParallelism {
                    model_name: step.model_name().to_string(),
                    max_parallelism,
                });
            }
            materialized.push(step);
        }

        let strategy = Self::assemble(materialized, name);
        if !strategy.uses_registered_models {
            log::info!(
                "Using a model via factory function, so optimization is not resumable if interrupted."
            );
        }
        Ok(strategy)
    }

    /// Build from a persisted configuration.
    pub fn from_config(config: &StrategyConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.steps.iter().cloned().map(Into::into).collect(),
            config.name.clone(),
        )
    }

    fn assemble(steps: Vec<GenerationStep>, name: Option<String>) -> Self {
        let name = name.unwrap_or_else(|| {
            steps
                .iter()
                .map(|s| s.model_name().strip_prefix("get_").unwrap_or(s.model_name()))
                .collect::<Vec<_>>()
                .join("+")
        });
        let uses_registered_models = steps.iter().all(|s| s.config().model.is_registered());
        Self {
            name,
            steps,
            curr: 0,
            experiment_name: None,
            generator_runs: Vec::new(),
            has_model: false,
            seen_trial_indices_by_status: None,
            uses_registered_models,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn steps(&self) -> &[GenerationStep] {
        &self.steps
    }

    pub fn current_step(&self) -> &GenerationStep {
        &self.steps[self.curr]
    }

    pub fn current_step_index(&self) -> usize {
        self.curr
    }

    /// Name of the experiment this strategy is bound to.
    pub fn experiment_name(&self) -> Option<&str> {
        self.experiment_name.as_deref()
    }

    /// Model fitted for the current step, if any.
    pub fn model(&self) -> Option<&dyn Model> {
        self.current_step().fitted_model()
    }

    /// Every generator run produced, in order.
    pub fn generator_runs(&self) -> &[GeneratorRun] {
        &self.generator_runs
    }

    pub fn last_generator_run(&self) -> Option<&GeneratorRun> {
        self.generator_runs.last()
    }

    /// Whether any step uses a factory model, which makes the strategy non-persistable.
    pub fn uses_non_registered_models(&self) -> bool {
        !self.uses_registered_models
    }

    /// Cumulative trial counts at which the model changes.
    ///
    /// Stops at the first unlimited step, whose end depends on its criteria.
    pub fn model_transitions(&self) -> Vec<usize> {
        let mut transitions = Vec::new();
        let mut total = 0;
        for step in &self.steps[..self.steps.len() - 1] {
            if step.num_trials() < 0 {
                break;
            }
            total += step.num_trials() as usize;
            transitions.push(total);
        }
        transitions
    }

    /// One row per trial generated by this strategy's steps.
    pub fn trials_summary(&self, experiment: &dyn ExperimentView) -> Vec<TrialSummaryRow> {
        let mut rows: Vec<TrialSummaryRow> = experiment
            .trial_summaries()
            .into_iter()
            .filter_map(|trial| {
                let step = self.steps.get(trial.generation_step_index?)?;
                Some(TrialSummaryRow {
                    step_index: step.index(),
                    model_name: step.model_name().to_string(),
                    trial_index: trial.index,
                    status: trial.status,
                    arms: experiment
                        .trial_arms(trial.index)
                        .iter()
                        .map(|a| (a.name.clone().unwrap_or_default(), a.parameters.clone()))
                        .collect(),
                })
            })
            .collect();
        rows.sort_by_key(|r| (r.step_index, r.trial_index));
        rows
    }

    /// Copy of this strategy's step definitions, without any generation state.
    pub fn clone_reset(&self) -> Self {
        let steps = self
            .steps
            .iter()
            .map(|s| GenerationStep::materialize(s.config().clone(), s.index()))
            .collect();
        Self::assemble(steps, Some(self.name.clone()))
    }

    /// Clear state that is not persisted: cached models and fit snapshots.
    pub fn reset_non_persistent_state(&mut self) {
        self.seen_trial_indices_by_status = None;
        self.has_model = false;
        for step in &mut self.steps {
            step.node_mut().invalidate();
        }
    }

    /// Register that a completed trial received new data.
    pub fn register_trial_data_update(&self, _trial_index: usize) -> Result<(), GenerationError> {
        if self.steps.iter().any(|s| s.use_update()) {
            return Err(GenerationError::Unsupported(
                "Updating completed trials with new data is not supported for generation strategies that use model updates".into(),
            ));
        }
        Ok(())
    }

    /// Produce the next generator run.
    pub fn generate(
        &mut self,
        experiment: &dyn ExperimentView,
        data: Option<&Data>,
        options: GenOptions<'_>,
    ) -> Result<GeneratorRun, GenerationError> {
        self.generate_multiple(experiment, 1, data, options)?
            .into_iter()
            .next()
            .ok_or(GenerationError::NoGeneratorRuns)
    }

    /// Produce up to `num_generator_runs` generator runs, each meant to
    /// become one trial.
    ///
    /// The count is clamped to the current step's remaining parallelism and,
    /// when the budget is enforced, its remaining budget. If generation
    /// reports `DataRequired` after at least one run was produced, the runs
    /// produced so far are returned.
    pub fn generate_multiple(
        &mut self,
        experiment: &dyn ExperimentView,
        num_generator_runs: usize,
        data: Option<&Data>,
        options: GenOptions<'_>,
    ) -> Result<Vec<GeneratorRun>, GenerationError> {
        self.bind_experiment(experiment)?;
        self.maybe_move_to_next_step(experiment, true)?;
        self.fit_or_update_current_model(experiment, data)?;

        let step = &self.steps[self.curr];
        let mut num_generator_runs = num_generator_runs;
        if let Some(remaining) =
            step.num_remaining_trials_until_max_parallelism(experiment, true)?
        {
            num_generator_runs = num_generator_runs.min(remaining);
        }
        if step.enforce_num_trials() && step.num_trials() > 0 {
            let left = (step.num_trials() - step.num_can_complete(experiment) as i64).max(0);
            num_generator_runs = num_generator_runs.min(left as usize);
        }

        let mut pending = options.pending_observations.cloned().unwrap_or_default();
        let arms_by_signature = experiment.arms_by_signature();
        let mut generator_runs = Vec::with_capacity(num_generator_runs);
        for _ in 0..num_generator_runs {
            let step_options = GenOptions {
                pending_observations: Some(&pending),
                arms_by_signature_for_deduplication: Some(arms_by_signature),
                ..options
            };
            let run = match self.steps[self.curr].generate(step_options) {
                Ok(run) => run,
                Err(GenerationError::DataRequired(msg)) if !generator_runs.is_empty() => {
                    log::debug!("Model required more data: {msg}");
                    break;
                }
                Err(e) => return Err(e),
            };
            extend_pending_observations(experiment, &mut pending, &run);
            self.generator_runs.push(run.clone());
            generator_runs.push(run);
        }
        Ok(generator_runs)
    }

    /// How many generator runs could be produced now (-1 for unlimited), and
    /// whether the strategy is completed.
    ///
    /// May advance the current step, which the next call to `generate` would
    /// do anyway.
    pub fn current_generator_run_limit(
        &mut self,
        experiment: &dyn ExperimentView,
    ) -> Result<(i64, bool), GenerationError> {
        self.bind_experiment(experiment)?;
        match self.maybe_move_to_next_step(experiment, false) {
            Ok(_) => {}
            Err(e) if e.is_completed() => return Ok((0, true)),
            Err(e) => return Err(e),
        }

        let step = self.current_step();
        let (to_gen, _) = step.num_trials_to_gen_and_complete(experiment);
        let until_max_parallelism =
            step.num_remaining_trials_until_max_parallelism(experiment, false)?;
        Ok(match until_max_parallelism {
            Some(remaining) if to_gen == -1 => (remaining as i64, false),
            Some(remaining) => (to_gen.min(remaining as i64), false),
            None => (to_gen, false),
        })
    }

    fn bind_experiment(&mut self, experiment: &dyn ExperimentView) -> Result<(), GenerationError> {
        match &self.experiment_name {
            Some(bound) if bound != experiment.name() => Err(GenerationError::ExperimentMismatch {
                bound: bound.clone(),
                given: experiment.name().to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.experiment_name = Some(experiment.name().to_string());
                Ok(())
            }
        }
    }

    fn completed_error(&self) -> GenerationError {
        GenerationError::Completed(format!(
            "Generation strategy {self} generated all the trials as specified in its steps."
        ))
    }

    fn move_to_next_step(&mut self) {
        log::info!(
            "Generation strategy {} moving from step {} ({}) to step {} ({})",
            self.name,
            self.curr,
            self.steps[self.curr].model_name(),
            self.curr + 1,
            self.steps[self.curr + 1].model_name()
        );
        self.curr += 1;
        // The next step's model is fitted from scratch even if it uses `update`.
        self.has_model = false;
    }

    /// Advance to the next step if the current one is done. Returns whether
    /// the strategy moved.
    ///
    /// Fails with `Completed` when the last step is done, and with
    /// `DataRequired` when `raise_data_required` is set, the step enforces its
    /// budget, the budget has been generated and not enough trials have been
    /// observed yet.
    fn maybe_move_to_next_step(
        &mut self,
        experiment: &dyn ExperimentView,
        raise_data_required: bool,
    ) -> Result<bool, GenerationError> {
        let is_last = self.curr + 1 == self.steps.len();
        let step = &self.steps[self.curr];
        let (to_gen, to_complete) = step.num_trials_to_gen_and_complete(experiment);

        if to_gen == -1 && to_complete == -1 {
            let criteria = step.completion_criteria();
            if !criteria.is_empty() && criteria.iter().all(|c| c.is_met(experiment)) {
                if is_last {
                    return Err(self.completed_error());
                }
                self.move_to_next_step();
                return Ok(true);
            }
            return Ok(false);
        }

        if to_gen > 0 || to_complete > 0 {
            if raise_data_required && step.enforce_num_trials() && to_gen == 0 {
                return Err(GenerationError::DataRequired(format!(
                    "All trials for step #{} ({}) have been generated, but not enough data has been observed to move on. Try again when more trials have completed.",
                    step.index(),
                    step.model_name()
                )));
            }
            return Ok(false);
        }

        if is_last {
            return Err(self.completed_error());
        }
        self.move_to_next_step();
        Ok(true)
    }

    fn fit_or_update_current_model(
        &mut self,
        experiment: &dyn ExperimentView,
        data: Option<&Data>,
    ) -> Result<(), GenerationError> {
        if self.has_model && self.steps[self.curr].use_update() {
            if let Some(new_data) = self.data_for_update(experiment, data) {
                log::info!(
                    "Updating model with data for trials: {:?}",
                    new_data.trial_indices()
                );
                self.steps[self.curr].update(experiment, &new_data)?;
            }
        } else {
            let previous_step_required_observations =
                self.curr > 0 && self.steps[self.curr - 1].min_trials_observed() > 0;
            let data = self.steps[self.curr].get_data_for_fit(
                experiment,
                data,
                previous_step_required_observations,
            )?;
            self.fit_current_model(experiment, &data)?;
        }
        self.seen_trial_indices_by_status = Some(experiment.trial_indices_by_status());
        Ok(())
    }

    /// Fit the current step's model from scratch, resuming from the state
    /// recorded on the last generator run if it came from this step.
    fn fit_current_model(
        &mut self,
        experiment: &dyn ExperimentView,
        data: &Data,
    ) -> Result<(), GenerationError> {
        let step = &self.steps[self.curr];
        let mut model_state = ModelKwargs::new();
        if let Some(last) = self.generator_runs.last()
            && last.generation_step_index == Some(self.curr)
            && let Some(state) = &last.model_state_after_gen
            && !state.is_empty()
        {
            if self.has_model || step.config().model.is_registered() {
                model_state = state.clone();
            } else {
                log::warn!(
                    "Model state recorded on the last generator run cannot be applied to step #{} ({}): models defined via factory functions do not support reloading from stored state.",
                    step.index(),
                    step.model_name()
                );
            }
        }

        if !data.is_empty() {
            log::debug!(
                "Fitting model with data for trials: {:?}",
                data.trial_indices()
            );
        }
        self.steps[self.curr].fit(experiment, data, &model_state)?;
        self.has_model = true;
        Ok(())
    }

    /// Data for trials completed since the last fit or update, or `None` if
    /// there is nothing new.
    fn data_for_update(
        &self,
        experiment: &dyn ExperimentView,
        passed_in_data: Option<&Data>,
    ) -> Option<Data> {
        let newly_completed = self.trials_completed_since_last_gen(experiment);
        if newly_completed.is_empty() {
            log::debug!("No newly completed trials since last model update.");
            return None;
        }

        match passed_in_data {
            None => {
                let new_data = experiment.lookup_data(Some(&newly_completed));
                if new_data.is_empty() {
                    log::info!("No new data is attached to experiment; no need for model update.");
                    return None;
                }
                Some(new_data)
            }
            Some(data) if data.is_empty() => {
                log::info!("Manually supplied data is empty; no need for model update.");
                None
            }
            Some(data) => Some(data.filter_trials(&newly_completed)),
        }
    }

    fn trials_completed_since_last_gen(&self, experiment: &dyn ExperimentView) -> BTreeSet<usize> {
        let completed_now = experiment
            .trial_indices_by_status()
            .with_status(TrialStatus::Completed)
            .clone();
        match &self.seen_trial_indices_by_status {
            None => completed_now,
            Some(seen) => completed_now
                .difference(seen.with_status(TrialStatus::Completed))
                .copied()
                .collect(),
        }
    }

    /// Restore generation progress onto a freshly built strategy.
    pub(crate) fn restore(
        &mut self,
        current_step: usize,
        generator_runs: Vec<GeneratorRun>,
        experiment_name: Option<String>,
    ) -> Result<(), ConfigError> {
        if current_step >= self.steps.len() {
            return Err(ConfigError::InvalidRun(format!(
                "current step {current_step} out of range for {} steps",
                self.steps.len()
            )));
        }
        self.curr = current_step;
        self.generator_runs = generator_runs;
        self.experiment_name = experiment_name;
        Ok(())
    }
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let remaining = if self.steps.len() > 1 {
            "subsequent"
        } else {
            "all"
        };
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| match s.num_trials() {
                -1 => format!("{} for {remaining} trials", s.model_name()),
                n => format!("{} for {n} trials", s.model_name()),
            })
            .collect();
        write!(
            f,
            "GenerationStrategy(name='{}', steps=[{}])",
            self.name,
            steps.join(", ")
        )
    }
}

/// Add the arms of `run` to the pending points of every experiment metric.
pub fn extend_pending_observations(
    experiment: &dyn ExperimentView,
    pending_observations: &mut PendingObservations,
    run: &GeneratorRun,
) {
    for metric in experiment.metrics() {
        let pending = pending_observations.entry(metric.name.clone()).or_default();
        for arm in &run.arms {
            let features = ObservationFeatures::from_arm(arm, None);
            if !pending.contains(&features) {
                pending.push(features);
            }
        }
    }
}

//! In-memory experiment used by the CLI runner, benches and tests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{ExperimentError, ExperimentView, Metric, TrialSummary};
use crate::schema::{Arm, Data, GeneratorRun, Observation, SearchSpace, TrialStatus};

/// A unit of execution wrapping the arms of one generator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub index: usize,
    pub status: TrialStatus,
    /// Named arms.
    pub arms: Vec<Arm>,
    /// Step that produced the generator run, if any.
    pub generation_step_index: Option<usize>,
    /// Key of the model that produced the arms.
    pub model_key: String,
}

/// Experiment holding trials, arms and observed data in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    name: String,
    search_space: SearchSpace,
    metrics: Vec<Metric>,
    trials: BTreeMap<usize, Trial>,
    data: Data,
    #[serde(default)]
    status_quo: Option<Arm>,
    arms_by_signature: BTreeMap<String, Arm>,
    arms_by_name: BTreeMap<String, Arm>,
}

impl Experiment {
    /// Create an empty experiment.
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            name: name.into(),
            search_space,
            metrics: Vec::new(),
            trials: BTreeMap::new(),
            data: Data::default(),
            status_quo: None,
            arms_by_signature: BTreeMap::new(),
            arms_by_name: BTreeMap::new(),
        }
    }

    /// Add a tracked metric.
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn trial(&self, index: usize) -> Option<&Trial> {
        self.trials.get(&index)
    }

    pub fn trials(&self) -> impl Iterator<Item = &Trial> {
        self.trials.values()
    }

    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    /// Turn a generator run into a new `Candidate` trial and return its index.
    ///
    /// Arms are named `<trial>_<arm>`, unless an arm with the same signature
    /// already exists on the experiment, in which case its name is reused.
    pub fn new_trial(&mut self, generator_run: &GeneratorRun) -> usize {
        let index = self.trials.len();
        let arms = generator_run
            .arms
            .iter()
            .enumerate()
            .map(|(i, arm)| self.register_arm(arm, format!("{index}_{i}")))
            .collect();

        self.trials.insert(
            index,
            Trial {
                index,
                status: TrialStatus::Candidate,
                arms,
                generation_step_index: generator_run.generation_step_index,
                model_key: generator_run.model_key.clone(),
            },
        );
        index
    }

    fn register_arm(&mut self, arm: &Arm, default_name: String) -> Arm {
        let signature = arm.signature();
        if let Some(existing) = self.arms_by_signature.get(&signature) {
            return existing.clone();
        }
        let named = arm.named(arm.name.clone().unwrap_or(default_name));
        if let Some(name) = &named.name {
            self.arms_by_name.insert(name.clone(), named.clone());
        }
        self.arms_by_signature.insert(signature, named.clone());
        named
    }

    /// Move a trial to a new status.
    pub fn set_trial_status(
        &mut self,
        index: usize,
        status: TrialStatus,
    ) -> Result<(), ExperimentError> {
        let trial = self
            .trials
            .get_mut(&index)
            .ok_or(ExperimentError::UnknownTrial(index))?;

        let allowed = match status {
            TrialStatus::Candidate => false,
            TrialStatus::Staged => trial.status == TrialStatus::Candidate,
            TrialStatus::Running => {
                matches!(trial.status, TrialStatus::Candidate | TrialStatus::Staged)
            }
            TrialStatus::Completed | TrialStatus::EarlyStopped => {
                trial.status == TrialStatus::Running
            }
            TrialStatus::Failed | TrialStatus::Abandoned => !trial.status.is_terminal(),
        };
        if !allowed {
            return Err(ExperimentError::InvalidStatusTransition {
                index,
                from: trial.status,
                to: status,
            });
        }

        trial.status = status;
        Ok(())
    }

    pub fn mark_running(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.set_trial_status(index, TrialStatus::Running)
    }

    pub fn mark_completed(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.set_trial_status(index, TrialStatus::Completed)
    }

    pub fn mark_failed(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.set_trial_status(index, TrialStatus::Failed)
    }

    pub fn mark_abandoned(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.set_trial_status(index, TrialStatus::Abandoned)
    }

    pub fn mark_early_stopped(&mut self, index: usize) -> Result<(), ExperimentError> {
        self.set_trial_status(index, TrialStatus::EarlyStopped)
    }

    /// Attach observations; every observation must reference an arm of its trial.
    pub fn attach_data(&mut self, data: Data) -> Result<(), ExperimentError> {
        for obs in &data.observations {
            let trial = self
                .trials
                .get(&obs.trial_index)
                .ok_or(ExperimentError::UnknownTrial(obs.trial_index))?;
            if !trial
                .arms
                .iter()
                .any(|a| a.name.as_deref() == Some(obs.arm_name.as_str()))
            {
                return Err(ExperimentError::UnknownArm {
                    trial_index: obs.trial_index,
                    arm_name: obs.arm_name.clone(),
                });
            }
        }
        self.data.extend(data);
        Ok(())
    }

    /// Attach one value of `metric` for every arm of a trial.
    pub fn attach_trial_values(
        &mut self,
        index: usize,
        metric: &str,
        values: &[f64],
    ) -> Result<(), ExperimentError> {
        let trial = self
            .trials
            .get(&index)
            .ok_or(ExperimentError::UnknownTrial(index))?;
        let observations = trial
            .arms
            .iter()
            .zip(values)
            .filter_map(|(arm, value)| {
                arm.name.as_ref().map(|name| Observation {
                    trial_index: index,
                    arm_name: name.clone(),
                    metric_name: metric.to_string(),
                    mean: *value,
                    sem: None,
                })
            })
            .collect();
        self.attach_data(Data::new(observations))
    }

    pub fn set_status_quo(&mut self, arm: Arm) {
        self.status_quo = Some(arm);
    }
}

impl ExperimentView for Experiment {
    fn name(&self) -> &str {
        &self.name
    }

    fn search_space(&self) -> &SearchSpace {
        &self.search_space
    }

    fn trial_summaries(&self) -> Vec<TrialSummary> {
        self.trials
            .values()
            .map(|t| TrialSummary {
                index: t.index,
                status: t.status,
                generation_step_index: t.generation_step_index,
            })
            .collect()
    }

    fn trial_arms(&self, trial_index: usize) -> &[Arm] {
        self.trials
            .get(&trial_index)
            .map(|t| t.arms.as_slice())
            .unwrap_or(&[])
    }

    fn lookup_data(&self, trial_indices: Option<&BTreeSet<usize>>) -> Data {
        match trial_indices {
            Some(indices) => self.data.filter_trials(indices),
            None => self.data.clone(),
        }
    }

    fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    fn arms_by_signature(&self) -> &BTreeMap<String, Arm> {
        &self.arms_by_signature
    }

    fn arm(&self, name: &str) -> Option<&Arm> {
        self.arms_by_name.get(name)
    }

    fn status_quo(&self) -> Option<&Arm> {
        self.status_quo.as_ref()
    }
}

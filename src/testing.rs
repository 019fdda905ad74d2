//! Test doubles shared by unit tests.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::experiment::{Experiment, ExperimentView, Metric};
use crate::generation::ModelFactory;
use crate::models::{CvResult, GenRequest, Model, ModelError};
use crate::schema::{Arm, Data, GeneratorRun, ModelKwargs, RangeParameter, SearchSpace};

#[derive(Debug, Default)]
struct StubLog {
    fit_trials: Vec<BTreeSet<usize>>,
    fit_kwargs: Vec<ModelKwargs>,
    update_trials: Vec<BTreeSet<usize>>,
    num_gens: usize,
    num_cross_validations: usize,
    next_value: usize,
}

#[derive(Debug, Clone, Default)]
struct StubBehaviour {
    duplicates: Option<(usize, Arm)>,
    insufficient_data_after: Option<usize>,
    cv_error: Option<f64>,
}

/// Handle to a scripted model. Every model built from it shares one call log.
///
/// Unless scripted otherwise, each generated arm is unique.
#[derive(Debug, Clone, Default)]
pub struct StubModel {
    log: Arc<Mutex<StubLog>>,
    behaviour: StubBehaviour,
}

impl StubModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `arm` from the first `count` generation calls.
    pub fn duplicates(mut self, count: usize, arm: Arm) -> Self {
        self.behaviour.duplicates = Some((count, arm));
        self
    }

    /// Report insufficient data once `count` generation calls have succeeded.
    pub fn insufficient_data_after(mut self, count: usize) -> Self {
        self.behaviour.insufficient_data_after = Some(count);
        self
    }

    /// Cross-validate with a constant prediction error.
    pub fn cv_error(mut self, error: f64) -> Self {
        self.behaviour.cv_error = Some(error);
        self
    }

    pub fn factory(&self) -> ModelFactory {
        let stub = self.clone();
        ModelFactory::new(move |kwargs| stub.build(kwargs)).named("Stub")
    }

    pub fn build(&self, kwargs: &ModelKwargs) -> Result<Box<dyn Model>, ModelError> {
        Ok(Box::new(StubInstance {
            stub: self.clone(),
            kwargs: kwargs.clone(),
            fitted: false,
        }))
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut StubLog) -> T) -> T {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut log)
    }

    pub fn num_fits(&self) -> usize {
        self.with_log(|l| l.fit_trials.len())
    }

    pub fn num_updates(&self) -> usize {
        self.with_log(|l| l.update_trials.len())
    }

    pub fn num_gens(&self) -> usize {
        self.with_log(|l| l.num_gens)
    }

    pub fn num_cross_validations(&self) -> usize {
        self.with_log(|l| l.num_cross_validations)
    }

    /// Trials present in the data of each fit.
    pub fn fit_trials(&self) -> Vec<BTreeSet<usize>> {
        self.with_log(|l| l.fit_trials.clone())
    }

    /// Kwargs each fitted model was built with.
    pub fn fit_kwargs(&self) -> Vec<ModelKwargs> {
        self.with_log(|l| l.fit_kwargs.clone())
    }

    /// Trials present in the data of each update.
    pub fn update_trials(&self) -> Vec<BTreeSet<usize>> {
        self.with_log(|l| l.update_trials.clone())
    }
}

#[derive(Debug)]
struct StubInstance {
    stub: StubModel,
    kwargs: ModelKwargs,
    fitted: bool,
}

impl Model for StubInstance {
    fn fit(
        &mut self,
        _experiment: &dyn ExperimentView,
        _search_space: &SearchSpace,
        data: &Data,
    ) -> Result<(), ModelError> {
        self.fitted = true;
        let kwargs = self.kwargs.clone();
        self.stub.with_log(|l| {
            l.fit_trials.push(data.trial_indices());
            l.fit_kwargs.push(kwargs);
        });
        Ok(())
    }

    fn generate(&mut self, request: &GenRequest<'_>) -> Result<Vec<Arm>, ModelError> {
        if !self.fitted {
            return Err(ModelError::NotFitted);
        }
        let behaviour = &self.stub.behaviour;
        self.stub.with_log(|l| {
            if let Some(limit) = behaviour.insufficient_data_after
                && l.num_gens >= limit
            {
                return Err(ModelError::InsufficientData("stub needs more data".into()));
            }
            let draw = l.num_gens;
            l.num_gens += 1;
            if let Some((count, arm)) = &behaviour.duplicates
                && draw < *count
            {
                return Ok(vec![arm.clone(); request.n]);
            }
            Ok((0..request.n)
                .map(|_| {
                    l.next_value += 1;
                    Arm::from_pairs([("x", l.next_value as f64 / 1000.0)])
                })
                .collect())
        })
    }

    fn update(
        &mut self,
        _experiment: &dyn ExperimentView,
        new_data: &Data,
    ) -> Result<(), ModelError> {
        self.stub
            .with_log(|l| l.update_trials.push(new_data.trial_indices()));
        Ok(())
    }

    fn cross_validate(&self, _kwargs: &ModelKwargs) -> Result<Vec<CvResult>, ModelError> {
        let error = self
            .stub
            .behaviour
            .cv_error
            .ok_or_else(|| ModelError::Unsupported("cross_validate".into()))?;
        self.stub.with_log(|l| l.num_cross_validations += 1);
        Ok(vec![CvResult {
            arm_name: "0_0".into(),
            metric_name: "objective".into(),
            observed: 0.0,
            predicted: error,
        }])
    }

    fn state_after_gen(&self) -> Option<ModelKwargs> {
        let mut state = ModelKwargs::new();
        state.insert("num_gens".into(), json!(self.stub.num_gens()));
        Some(state)
    }
}

/// Experiment over `x` in [0, 1] tracking one `objective` metric.
pub fn test_experiment(name: &str) -> Experiment {
    Experiment::new(
        name,
        SearchSpace::new(vec![RangeParameter::float("x", 0.0, 1.0)]),
    )
    .with_metric(Metric::new("objective"))
}

/// Attach a generator run as a running trial.
pub fn run_trial(experiment: &mut Experiment, run: &GeneratorRun) -> usize {
    let index = experiment.new_trial(run);
    experiment
        .mark_running(index)
        .unwrap_or_else(|e| panic!("{e}"));
    index
}

/// Attach a value for every arm of a running trial and complete it.
pub fn complete_trial(experiment: &mut Experiment, index: usize) {
    let num_arms = experiment.trial_arms(index).len();
    experiment
        .attach_trial_values(index, "objective", &vec![index as f64; num_arms])
        .and_then(|_| experiment.mark_completed(index))
        .unwrap_or_else(|e| panic!("{e}"));
}

//! Gaussian perturbation search around the best observed arm.

use rand::prelude::*;

use super::{
    CvResult, GenRequest, Model, ModelError, apply_fixed_features, kwarg_bool, kwarg_f64,
    kwarg_str, kwarg_u64,
};
use crate::experiment::ExperimentView;
use crate::schema::{Arm, Data, ModelKwargs, Parameterization, SearchSpace};

const DEFAULT_STEP_SIZE: f64 = 0.1;
const MAX_PENDING_REDRAWS: usize = 10;

/// One observed objective value.
#[derive(Debug, Clone)]
struct Point {
    arm_name: String,
    parameters: Parameterization,
    value: f64,
}

/// Proposes Gaussian perturbations of the incumbent.
///
/// Kwargs:
/// - `objective`: metric to optimize (defaults to the first metric in data)
/// - `minimize`: optimization direction (defaults to the metric's
///   `lower_is_better`, else `true`)
/// - `step_size`: perturbation standard deviation as a fraction of each
///   parameter's range
/// - `seed`: random seed
#[derive(Debug)]
pub struct LocalSearchModel {
    objective: Option<String>,
    minimize: Option<bool>,
    step_size: f64,
    rng: StdRng,
    search_space: Option<SearchSpace>,
    points: Vec<Point>,
}

impl LocalSearchModel {
    pub fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self, ModelError> {
        let step_size = kwarg_f64(kwargs, "step_size")?.unwrap_or(DEFAULT_STEP_SIZE);
        if step_size <= 0.0 {
            return Err(ModelError::InvalidKwarg {
                name: "step_size".into(),
                reason: format!("must be positive, got {step_size}"),
            });
        }
        let seed = kwarg_u64(kwargs, "seed")?.unwrap_or_else(rand::random);
        Ok(Self {
            objective: kwarg_str(kwargs, "objective")?,
            minimize: kwarg_bool(kwargs, "minimize")?,
            step_size,
            rng: StdRng::seed_from_u64(seed),
            search_space: None,
            points: Vec::new(),
        })
    }

    /// Number of observations the model has seen.
    pub fn num_observations(&self) -> usize {
        self.points.len()
    }

    /// Incumbent arm parameters, if any data has been seen.
    pub fn best(&self) -> Option<&Parameterization> {
        let minimize = self.minimize.unwrap_or(true);
        self.points
            .iter()
            .filter(|p| p.value.is_finite())
            .min_by(|a, b| {
                let ord = a.value.total_cmp(&b.value);
                if minimize { ord } else { ord.reverse() }
            })
            .map(|p| &p.parameters)
    }

    fn absorb(&mut self, experiment: &dyn ExperimentView, data: &Data) {
        if self.objective.is_none() {
            self.objective = data
                .metric_names()
                .into_iter()
                .next()
                .map(str::to_string)
                .or_else(|| experiment.metrics().first().map(|m| m.name.clone()));
        }
        let Some(objective) = self.objective.clone() else {
            return;
        };
        if self.minimize.is_none() {
            self.minimize = experiment
                .metrics()
                .iter()
                .find(|m| m.name == objective)
                .and_then(|m| m.lower_is_better);
        }

        for obs in data.observations.iter().filter(|o| o.metric_name == objective) {
            if let Some(arm) = experiment.arm(&obs.arm_name) {
                self.points.push(Point {
                    arm_name: obs.arm_name.clone(),
                    parameters: arm.parameters.clone(),
                    value: obs.mean,
                });
            }
        }
    }

    fn perturb(
        &mut self,
        center: &Parameterization,
        search_space: &SearchSpace,
    ) -> Parameterization {
        search_space
            .parameters
            .iter()
            .map(|p| {
                let base = center
                    .get(&p.name)
                    .copied()
                    .unwrap_or((p.lower + p.upper) / 2.0);
                let noise: f64 = self.rng.sample(rand_distr::StandardNormal);
                (p.name.clone(), p.cast(base + noise * self.step_size * p.span()))
            })
            .collect()
    }

    fn uniform(&mut self, search_space: &SearchSpace) -> Parameterization {
        search_space
            .parameters
            .iter()
            .map(|p| {
                let value = if p.span() > 0.0 {
                    self.rng.gen_range(p.lower..=p.upper)
                } else {
                    p.lower
                };
                (p.name.clone(), p.cast(value))
            })
            .collect()
    }
}

/// Range-normalized Euclidean distance.
fn distance(a: &Parameterization, b: &Parameterization, search_space: &SearchSpace) -> f64 {
    search_space
        .parameters
        .iter()
        .map(|p| {
            let scale = if p.span() > 0.0 { p.span() } else { 1.0 };
            let da = a.get(&p.name).copied().unwrap_or(p.lower);
            let db = b.get(&p.name).copied().unwrap_or(p.lower);
            ((da - db) / scale).powi(2)
        })
        .sum::<f64>()
        .sqrt()
}

impl Model for LocalSearchModel {
    fn fit(
        &mut self,
        experiment: &dyn ExperimentView,
        search_space: &SearchSpace,
        data: &Data,
    ) -> Result<(), ModelError> {
        search_space.validate()?;
        self.points.clear();
        self.search_space = Some(search_space.clone());
        self.absorb(experiment, data);
        Ok(())
    }

    fn generate(&mut self, request: &GenRequest<'_>) -> Result<Vec<Arm>, ModelError> {
        let search_space = self.search_space.clone().ok_or(ModelError::NotFitted)?;
        let pending: Vec<&Parameterization> = request
            .pending_observations
            .values()
            .flatten()
            .map(|f| &f.parameters)
            .collect();

        let mut arms = Vec::with_capacity(request.n);
        for _ in 0..request.n {
            let mut candidate = Parameterization::new();
            for _ in 0..MAX_PENDING_REDRAWS {
                candidate = match self.best().cloned() {
                    Some(center) => self.perturb(&center, &search_space),
                    None => self.uniform(&search_space),
                };
                if !pending.contains(&&candidate) {
                    break;
                }
            }
            let mut arm = Arm::new(candidate);
            apply_fixed_features(&mut arm, request.fixed_features);
            arms.push(arm);
        }
        Ok(arms)
    }

    fn update(
        &mut self,
        experiment: &dyn ExperimentView,
        new_data: &Data,
    ) -> Result<(), ModelError> {
        if self.search_space.is_none() {
            return Err(ModelError::NotFitted);
        }
        self.absorb(experiment, new_data);
        Ok(())
    }

    fn cross_validate(&self, _kwargs: &ModelKwargs) -> Result<Vec<CvResult>, ModelError> {
        let search_space = self.search_space.as_ref().ok_or(ModelError::NotFitted)?;
        let Some(objective) = &self.objective else {
            return Err(ModelError::InsufficientData("no objective observed".into()));
        };
        if self.points.len() < 2 {
            return Err(ModelError::InsufficientData(format!(
                "leave-one-out needs at least 2 observations, got {}",
                self.points.len()
            )));
        }

        // Predict each point from its nearest neighbour among the others.
        Ok(self
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, held_out)| {
                self.points
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .min_by(|(_, a), (_, b)| {
                        distance(&a.parameters, &held_out.parameters, search_space).total_cmp(
                            &distance(&b.parameters, &held_out.parameters, search_space),
                        )
                    })
                    .map(|(_, nearest)| CvResult {
                        arm_name: held_out.arm_name.clone(),
                        metric_name: objective.clone(),
                        observed: held_out.value,
                        predicted: nearest.value,
                    })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::experiment::{Experiment, Metric};
    use crate::schema::{GeneratorRun, PendingObservations, RangeParameter};
    use serde_json::json;

    fn space() -> SearchSpace {
        SearchSpace::new(vec![RangeParameter::float("x", 0.0, 10.0)])
    }

    fn experiment_with(values: &[(f64, f64)]) -> Experiment {
        let mut exp = Experiment::new("test", space()).with_metric(Metric::new("objective"));
        for (x, y) in values {
            let idx = exp.new_trial(&GeneratorRun::new(vec![Arm::from_pairs([("x", *x)])], "T"));
            exp.mark_running(idx).unwrap();
            exp.attach_trial_values(idx, "objective", &[*y]).unwrap();
            exp.mark_completed(idx).unwrap();
        }
        exp
    }

    fn model() -> LocalSearchModel {
        let mut kwargs = ModelKwargs::new();
        kwargs.insert("seed".into(), json!(3));
        kwargs.insert("step_size".into(), json!(0.01));
        LocalSearchModel::from_kwargs(&kwargs).unwrap()
    }

    fn generate(model: &mut LocalSearchModel, n: usize) -> Vec<Arm> {
        let pending = PendingObservations::new();
        let kwargs = ModelKwargs::new();
        model
            .generate(&GenRequest {
                n,
                pending_observations: &pending,
                fixed_features: None,
                kwargs: &kwargs,
            })
            .unwrap()
    }

    #[test]
    fn test_generates_near_incumbent() {
        let exp = experiment_with(&[(1.0, 5.0), (7.0, 0.5), (9.0, 3.0)]);
        let mut model = model();
        model.fit(&exp, &space(), &exp.lookup_data(None)).unwrap();

        assert_eq!(model.best().unwrap()["x"], 7.0);
        for arm in generate(&mut model, 10) {
            assert!((arm.parameters["x"] - 7.0).abs() < 1.0);
        }
    }

    #[test]
    fn test_maximize_direction() {
        let exp = experiment_with(&[(1.0, 5.0), (7.0, 0.5)]);
        let mut kwargs = ModelKwargs::new();
        kwargs.insert("minimize".into(), json!(false));
        let mut model = LocalSearchModel::from_kwargs(&kwargs).unwrap();
        model.fit(&exp, &space(), &exp.lookup_data(None)).unwrap();
        assert_eq!(model.best().unwrap()["x"], 1.0);
    }

    #[test]
    fn test_update_appends_observations() {
        let exp = experiment_with(&[(1.0, 5.0), (7.0, 0.5), (9.0, 3.0)]);
        let mut model = model();
        let first_two = exp.lookup_data(Some(&BTreeSet::from([0, 1])));
        model.fit(&exp, &space(), &first_two).unwrap();
        assert_eq!(model.num_observations(), 2);

        model
            .update(&exp, &exp.lookup_data(Some(&BTreeSet::from([2]))))
            .unwrap();
        assert_eq!(model.num_observations(), 3);
    }

    #[test]
    fn test_cross_validate_needs_two_points() {
        let exp = experiment_with(&[(1.0, 5.0)]);
        let mut model = model();
        model.fit(&exp, &space(), &exp.lookup_data(None)).unwrap();
        assert!(matches!(
            model.cross_validate(&ModelKwargs::new()),
            Err(ModelError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_cross_validate_nearest_neighbour() {
        let exp = experiment_with(&[(1.0, 5.0), (2.0, 4.0), (9.0, 3.0)]);
        let mut model = model();
        model.fit(&exp, &space(), &exp.lookup_data(None)).unwrap();

        let results = model.cross_validate(&ModelKwargs::new()).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].predicted, 4.0);
        assert_eq!(results[2].predicted, 4.0);
    }

    #[test]
    fn test_no_data_falls_back_to_uniform() {
        let exp = experiment_with(&[]);
        let mut model = model();
        model.fit(&exp, &space(), &Data::default()).unwrap();
        assert_eq!(generate(&mut model, 4).len(), 4);
    }

    #[test]
    fn test_fit_rejects_overflowing_range() {
        let overflowing = SearchSpace::new(vec![RangeParameter::float("x", -1e308, 1e308)]);
        let exp = Experiment::new("test", overflowing.clone());
        let mut model = model();
        assert!(matches!(
            model.fit(&exp, &overflowing, &Data::default()),
            Err(ModelError::SearchSpace(_))
        ));
    }
}

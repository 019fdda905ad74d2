//! Seeded uniform random sampling over a search space.

use rand::prelude::*;
use serde_json::json;

use super::{GenRequest, Model, ModelError, apply_fixed_features, kwarg_u64};
use crate::experiment::ExperimentView;
use crate::schema::{Arm, Data, ModelKwargs, Parameterization, SearchSpace};

/// Draws arms independently and uniformly from the search space.
///
/// The model ignores data. Its only state is the seed and the number of
/// points drawn so far (`init_position`); re-fitting with that state as
/// kwargs continues the same sequence instead of restarting it.
#[derive(Debug)]
pub struct UniformModel {
    seed: u64,
    init_position: u64,
    rng: StdRng,
    search_space: Option<SearchSpace>,
}

impl UniformModel {
    /// Create from kwargs `seed` (random if absent) and `init_position`.
    pub fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self, ModelError> {
        let seed = kwarg_u64(kwargs, "seed")?.unwrap_or_else(rand::random);
        let init_position = kwarg_u64(kwargs, "init_position")?.unwrap_or(0);
        Ok(Self {
            seed,
            init_position,
            rng: StdRng::seed_from_u64(seed),
            search_space: None,
        })
    }

    /// Number of points drawn so far, including skipped ones.
    pub fn init_position(&self) -> u64 {
        self.init_position
    }

    fn draw(rng: &mut StdRng, search_space: &SearchSpace) -> Parameterization {
        search_space
            .parameters
            .iter()
            .map(|p| {
                let value = if p.span() > 0.0 {
                    rng.gen_range(p.lower..=p.upper)
                } else {
                    p.lower
                };
                (p.name.clone(), p.cast(value))
            })
            .collect()
    }
}

impl Model for UniformModel {
    fn fit(
        &mut self,
        _experiment: &dyn ExperimentView,
        search_space: &SearchSpace,
        _data: &Data,
    ) -> Result<(), ModelError> {
        search_space.validate()?;
        // Replay the sequence up to the recorded position.
        self.rng = StdRng::seed_from_u64(self.seed);
        for _ in 0..self.init_position {
            Self::draw(&mut self.rng, search_space);
        }
        self.search_space = Some(search_space.clone());
        Ok(())
    }

    fn generate(&mut self, request: &GenRequest<'_>) -> Result<Vec<Arm>, ModelError> {
        let search_space = self.search_space.as_ref().ok_or(ModelError::NotFitted)?;
        let mut arms = Vec::with_capacity(request.n);
        for _ in 0..request.n {
            let mut arm = Arm::new(Self::draw(&mut self.rng, search_space));
            apply_fixed_features(&mut arm, request.fixed_features);
            arms.push(arm);
            self.init_position += 1;
        }
        Ok(arms)
    }

    fn update(
        &mut self,
        _experiment: &dyn ExperimentView,
        _new_data: &Data,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    fn state_after_gen(&self) -> Option<ModelKwargs> {
        let mut state = ModelKwargs::new();
        state.insert("seed".into(), json!(self.seed));
        state.insert("init_position".into(), json!(self.init_position));
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Experiment;
    use crate::schema::{PendingObservations, RangeParameter};

    fn space() -> SearchSpace {
        SearchSpace::new(vec![
            RangeParameter::float("x", 0.0, 1.0),
            RangeParameter::int("k", 1, 4),
        ])
    }

    fn seeded(seed: u64, init_position: u64) -> UniformModel {
        let mut kwargs = ModelKwargs::new();
        kwargs.insert("seed".into(), json!(seed));
        kwargs.insert("init_position".into(), json!(init_position));
        UniformModel::from_kwargs(&kwargs).unwrap()
    }

    fn generate(model: &mut UniformModel, n: usize) -> Vec<Arm> {
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
    fn test_arms_within_bounds() {
        let exp = Experiment::new("test", space());
        let mut model = seeded(7, 0);
        model.fit(&exp, &space(), &Data::default()).unwrap();

        for arm in generate(&mut model, 50) {
            assert!(space().contains(&arm.parameters));
            assert_eq!(arm.parameters["k"].fract(), 0.0);
        }
    }

    #[test]
    fn test_generate_before_fit_fails() {
        let mut model = seeded(1, 0);
        let pending = PendingObservations::new();
        let kwargs = ModelKwargs::new();
        let result = model.generate(&GenRequest {
            n: 1,
            pending_observations: &pending,
            fixed_features: None,
            kwargs: &kwargs,
        });
        assert_eq!(result, Err(ModelError::NotFitted));
    }

    #[test]
    fn test_state_resumes_sequence() {
        let exp = Experiment::new("test", space());

        let mut full = seeded(11, 0);
        full.fit(&exp, &space(), &Data::default()).unwrap();
        let all = generate(&mut full, 5);

        let mut first = seeded(11, 0);
        first.fit(&exp, &space(), &Data::default()).unwrap();
        generate(&mut first, 3);
        let state = first.state_after_gen().unwrap();
        assert_eq!(state["init_position"], json!(3));

        let mut resumed = UniformModel::from_kwargs(&state).unwrap();
        resumed.fit(&exp, &space(), &Data::default()).unwrap();
        assert_eq!(generate(&mut resumed, 2), all[3..].to_vec());
    }

    #[test]
    fn test_fit_rejects_overflowing_range() {
        let overflowing = SearchSpace::new(vec![RangeParameter::float("x", -1e308, 1e308)]);
        let exp = Experiment::new("test", overflowing.clone());
        let mut model = seeded(5, 2);
        assert!(matches!(
            model.fit(&exp, &overflowing, &Data::default()),
            Err(ModelError::SearchSpace(_))
        ));
    }
}

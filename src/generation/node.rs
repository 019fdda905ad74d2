//! Generation nodes: pick a fitted model spec and draw deduplicated batches from it.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{GenerationError, ModelSpec};
use crate::experiment::ExperimentView;
use crate::models::{BestModelSelector, ModelError};
use crate::schema::{
    Arm, ConfigError, Data, GeneratorRun, ModelKwargs, PendingObservations, SearchSpace,
};

/// Default number of draws allowed when deduplicating.
pub const MAX_GEN_DRAWS: usize = 5;

/// Options for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenOptions<'a> {
    /// Arms per generator run; falls back to the model spec's `n`, then 1.
    pub n: Option<usize>,
    pub pending_observations: Option<&'a PendingObservations>,
    /// Total draws allowed before giving up on finding unique arms.
    pub max_gen_draws_for_deduplication: usize,
    /// Arms that generated arms must not repeat.
    pub arms_by_signature_for_deduplication: Option<&'a BTreeMap<String, Arm>>,
    /// Overrides for the model spec's generation kwargs.
    pub model_gen_kwargs: Option<&'a ModelKwargs>,
}

impl Default for GenOptions<'_> {
    fn default() -> Self {
        Self {
            n: None,
            pending_observations: None,
            max_gen_draws_for_deduplication: MAX_GEN_DRAWS,
            arms_by_signature_for_deduplication: None,
            model_gen_kwargs: None,
        }
    }
}

impl<'a> GenOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n(mut self, n: usize) -> Self {
        self.n = Some(n);
        self
    }

    pub fn pending_observations(mut self, pending: &'a PendingObservations) -> Self {
        self.pending_observations = Some(pending);
        self
    }

    pub fn max_gen_draws(mut self, max_draws: usize) -> Self {
        self.max_gen_draws_for_deduplication = max_draws;
        self
    }

    pub fn deduplicate_against(mut self, arms_by_signature: &'a BTreeMap<String, Arm>) -> Self {
        self.arms_by_signature_for_deduplication = Some(arms_by_signature);
        self
    }

    pub fn model_gen_kwargs(mut self, kwargs: &'a ModelKwargs) -> Self {
        self.model_gen_kwargs = Some(kwargs);
        self
    }
}

/// A set of model specs, an optional selector and a deduplication policy.
#[derive(Debug)]
pub struct GenerationNode {
    model_specs: Vec<ModelSpec>,
    best_model_selector: Option<Arc<dyn BestModelSelector>>,
    should_deduplicate: bool,
    /// Index of the model spec chosen for the current fit cycle.
    model_spec_to_gen_from: Option<usize>,
}

impl GenerationNode {
    pub fn new(
        model_specs: Vec<ModelSpec>,
        best_model_selector: Option<Arc<dyn BestModelSelector>>,
        should_deduplicate: bool,
    ) -> Result<Self, ConfigError> {
        if model_specs.is_empty() {
            return Err(ConfigError::NoModelSpecs);
        }
        Ok(Self {
            model_specs,
            best_model_selector,
            should_deduplicate,
            model_spec_to_gen_from: None,
        })
    }

    /// Node generating from exactly one model spec.
    pub(crate) fn single(model_spec: ModelSpec, should_deduplicate: bool) -> Self {
        Self {
            model_specs: vec![model_spec],
            best_model_selector: None,
            should_deduplicate,
            model_spec_to_gen_from: None,
        }
    }

    pub fn model_specs(&self) -> &[ModelSpec] {
        &self.model_specs
    }

    pub(crate) fn model_specs_mut(&mut self) -> &mut [ModelSpec] {
        &mut self.model_specs
    }

    pub fn should_deduplicate(&self) -> bool {
        self.should_deduplicate
    }

    pub fn best_model_selector(&self) -> Option<&dyn BestModelSelector> {
        self.best_model_selector.as_deref()
    }

    /// Forget the model spec chosen in this fit cycle.
    pub fn invalidate(&mut self) {
        self.model_spec_to_gen_from = None;
    }

    /// Fit every model spec to the same data.
    pub fn fit(
        &mut self,
        experiment: &dyn ExperimentView,
        data: &Data,
        search_space: Option<&SearchSpace>,
        kwargs: &ModelKwargs,
    ) -> Result<(), GenerationError> {
        self.invalidate();
        for spec in &mut self.model_specs {
            spec.fit(experiment, data, search_space, kwargs)?;
        }
        Ok(())
    }

    pub fn update(
        &mut self,
        _experiment: &dyn ExperimentView,
        _new_data: &Data,
    ) -> Result<(), GenerationError> {
        Err(GenerationError::Unsupported(
            "`update` is not supported by generation nodes".into(),
        ))
    }

    /// The model spec to generate from, selected once per fit cycle.
    pub fn model_spec_to_gen_from(&mut self) -> Result<&mut ModelSpec, GenerationError> {
        let index = match self.model_spec_to_gen_from {
            Some(index) => index,
            None => {
                let index = self.pick_fitted_model_to_gen_from()?;
                self.model_spec_to_gen_from = Some(index);
                index
            }
        };
        Ok(&mut self.model_specs[index])
    }

    fn pick_fitted_model_to_gen_from(&mut self) -> Result<usize, GenerationError> {
        let Some(selector) = &self.best_model_selector else {
            if self.model_specs.len() != 1 {
                return Err(GenerationError::CannotSelectModel);
            }
            return Ok(0);
        };

        let mut diagnostics = Vec::with_capacity(self.model_specs.len());
        for spec in &mut self.model_specs {
            diagnostics.push(spec.cross_validate()?.clone());
        }
        let index = selector.best_diagnostic(&diagnostics)?;
        if index >= self.model_specs.len() {
            return Err(ModelError::Selection(format!(
                "selector chose model {index} of {}",
                self.model_specs.len()
            ))
            .into());
        }
        Ok(index)
    }

    /// Generate one batch, re-drawing while it repeats known arms.
    ///
    /// Fails with `RepeatedPoints` when `max_gen_draws_for_deduplication`
    /// draws in total have not produced a batch free of known arms. A model
    /// reporting insufficient data surfaces as `DataRequired`.
    pub fn generate(&mut self, options: GenOptions<'_>) -> Result<GeneratorRun, GenerationError> {
        let should_deduplicate = self.should_deduplicate;
        let spec = self.model_spec_to_gen_from()?;
        let n = options.n.or_else(|| spec.default_n());

        let no_pending = PendingObservations::new();
        let no_kwargs = ModelKwargs::new();
        let pending = options.pending_observations.unwrap_or(&no_pending);
        let kwargs = options.model_gen_kwargs.unwrap_or(&no_kwargs);

        let mut draws = 0;
        loop {
            let run = spec.generate(n, pending, kwargs).map_err(|e| match e {
                ModelError::InsufficientData(msg) => GenerationError::DataRequired(msg),
                e => e.into(),
            })?;
            draws += 1;

            let has_duplicates = should_deduplicate
                && options
                    .arms_by_signature_for_deduplication
                    .is_some_and(|seen| run.arms.iter().any(|a| seen.contains_key(&a.signature())));
            if !has_duplicates {
                return Ok(run);
            }
            if draws >= options.max_gen_draws_for_deduplication {
                return Err(GenerationError::RepeatedPoints {
                    max_draws: options.max_gen_draws_for_deduplication,
                });
            }
            log::info!(
                "Generator run produced duplicate arms, re-drawing ({draws}/{}). Candidates: {:?}",
                options.max_gen_draws_for_deduplication,
                run.arms
            );
        }
    }
}

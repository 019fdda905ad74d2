//! Model specs: one model source plus its kwargs and cached fitted state.

use std::fmt;
use std::sync::Arc;

use crate::experiment::ExperimentView;
use crate::models::{
    CvDiagnostics, CvResult, GenRequest, Model, ModelError, compute_diagnostics, kwarg_u64,
};
use crate::schema::{
    Data, GeneratorRun, ModelKwargs, ModelRegistry, ObservationFeatures, PendingObservations,
    SearchSpace, merge_kwargs,
};

/// Key recorded on generator runs from factory models without a name.
pub const UNKNOWN_MODEL_KEY: &str = "UnknownFactoryModel";

type BuildFn = dyn Fn(&ModelKwargs) -> Result<Box<dyn Model>, ModelError> + Send + Sync;

/// A user-supplied model constructor. Strategies using factories cannot be persisted.
#[derive(Clone)]
pub struct ModelFactory {
    name: Option<String>,
    build: Arc<BuildFn>,
}

impl ModelFactory {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&ModelKwargs) -> Result<Box<dyn Model>, ModelError> + Send + Sync + 'static,
    {
        Self {
            name: None,
            build: Arc::new(build),
        }
    }

    /// Name used as the model key and default step name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for ModelFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Where a model comes from.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Built-in model, referenced by name.
    Registered(ModelRegistry),
    /// Arbitrary constructor; not persistable.
    Factory(ModelFactory),
}

impl ModelSource {
    /// Model key, if known.
    pub fn key(&self) -> Option<&str> {
        match self {
            ModelSource::Registered(model) => Some(model.key()),
            ModelSource::Factory(factory) => factory.name(),
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, ModelSource::Registered(_))
    }

    fn build(&self, kwargs: &ModelKwargs) -> Result<Box<dyn Model>, ModelError> {
        match self {
            ModelSource::Registered(model) => model.build(kwargs),
            ModelSource::Factory(factory) => (factory.build)(kwargs),
        }
    }
}

impl From<ModelRegistry> for ModelSource {
    fn from(model: ModelRegistry) -> Self {
        ModelSource::Registered(model)
    }
}

impl From<ModelFactory> for ModelSource {
    fn from(factory: ModelFactory) -> Self {
        ModelSource::Factory(factory)
    }
}

/// One model source with its kwargs and the state cached by the last fit.
#[derive(Debug)]
pub struct ModelSpec {
    source: ModelSource,
    model_kwargs: ModelKwargs,
    model_gen_kwargs: ModelKwargs,
    model_cv_kwargs: ModelKwargs,
    fixed_features: Option<ObservationFeatures>,

    fitted_model: Option<Box<dyn Model>>,
    cv_results: Option<Vec<CvResult>>,
    diagnostics: Option<CvDiagnostics>,
}

impl ModelSpec {
    pub fn new(source: impl Into<ModelSource>) -> Self {
        Self {
            source: source.into(),
            model_kwargs: ModelKwargs::new(),
            model_gen_kwargs: ModelKwargs::new(),
            model_cv_kwargs: ModelKwargs::new(),
            fixed_features: None,
            fitted_model: None,
            cv_results: None,
            diagnostics: None,
        }
    }

    pub fn with_model_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.model_kwargs = kwargs;
        self
    }

    pub fn with_model_gen_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.model_gen_kwargs = kwargs;
        self
    }

    pub fn with_model_cv_kwargs(mut self, kwargs: ModelKwargs) -> Self {
        self.model_cv_kwargs = kwargs;
        self
    }

    pub fn with_fixed_features(mut self, features: ObservationFeatures) -> Self {
        self.fixed_features = Some(features);
        self
    }

    pub fn source(&self) -> &ModelSource {
        &self.source
    }

    pub fn model_key(&self) -> &str {
        self.source.key().unwrap_or(UNKNOWN_MODEL_KEY)
    }

    pub fn model_kwargs(&self) -> &ModelKwargs {
        &self.model_kwargs
    }

    pub fn model_gen_kwargs(&self) -> &ModelKwargs {
        &self.model_gen_kwargs
    }

    pub fn fixed_features(&self) -> Option<&ObservationFeatures> {
        self.fixed_features.as_ref()
    }

    pub fn fitted_model(&self) -> Option<&dyn Model> {
        self.fitted_model.as_deref()
    }

    pub fn cv_results(&self) -> Option<&[CvResult]> {
        self.cv_results.as_deref()
    }

    pub fn diagnostics(&self) -> Option<&CvDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Number of arms to generate when the caller does not say.
    pub fn default_n(&self) -> Option<usize> {
        kwarg_u64(&self.model_gen_kwargs, "n")
            .ok()
            .flatten()
            .map(|n| n as usize)
    }

    /// Drop everything cached by the previous fit.
    fn invalidate(&mut self) {
        self.fitted_model = None;
        self.cv_results = None;
        self.diagnostics = None;
    }

    /// Build and fit a fresh model. Call-time `kwargs` override the stored model kwargs.
    pub fn fit(
        &mut self,
        experiment: &dyn ExperimentView,
        data: &Data,
        search_space: Option<&SearchSpace>,
        kwargs: &ModelKwargs,
    ) -> Result<(), ModelError> {
        self.invalidate();
        let mut model = self.source.build(&merge_kwargs(&self.model_kwargs, kwargs))?;
        model.fit(
            experiment,
            search_space.unwrap_or_else(|| experiment.search_space()),
            data,
        )?;
        self.fitted_model = Some(model);
        Ok(())
    }

    /// Update the fitted model with new data.
    pub fn update(
        &mut self,
        experiment: &dyn ExperimentView,
        new_data: &Data,
    ) -> Result<(), ModelError> {
        self.fitted_model
            .as_mut()
            .ok_or(ModelError::NotFitted)?
            .update(experiment, new_data)
    }

    /// Cross-validate the fitted model and cache results and diagnostics.
    pub fn cross_validate(&mut self) -> Result<&CvDiagnostics, ModelError> {
        let model = self.fitted_model.as_ref().ok_or(ModelError::NotFitted)?;
        let results = model.cross_validate(&self.model_cv_kwargs)?;
        let diagnostics = compute_diagnostics(&results);
        self.cv_results = Some(results);
        Ok(self.diagnostics.insert(diagnostics))
    }

    /// Generate one batch from the fitted model.
    ///
    /// Call-time `kwargs` override `model_gen_kwargs`. Without an explicit
    /// `n`, the merged kwargs' `n` is used, else a single arm.
    pub fn generate(
        &mut self,
        n: Option<usize>,
        pending_observations: &PendingObservations,
        kwargs: &ModelKwargs,
    ) -> Result<GeneratorRun, ModelError> {
        let merged = merge_kwargs(&self.model_gen_kwargs, kwargs);
        let n = match n {
            Some(n) => n,
            None => kwarg_u64(&merged, "n")?.map_or(1, |n| n as usize),
        };
        let model_key = self.model_key().to_string();
        let model = self.fitted_model.as_mut().ok_or(ModelError::NotFitted)?;
        let arms = model.generate(&GenRequest {
            n,
            pending_observations,
            fixed_features: self.fixed_features.as_ref(),
            kwargs: &merged,
        })?;
        Ok(GeneratorRun::new(arms, model_key).with_model_state(model.state_after_gen()))
    }
}

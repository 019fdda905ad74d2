//! Models module - Candidate-generating models used by generation steps.
//!
//! The generation core treats models as an opaque capability: it fits them to
//! data, asks them for arms, optionally updates them with new data and
//! cross-validates them for model selection. Two built-in models are
//! registered by name so that strategies using them can be persisted:
//!
//! - `Uniform`: seeded uniform sampling, resumable from its recorded state
//! - `LocalSearch`: Gaussian perturbation around the best observed arm

mod local_search;
mod selector;
mod uniform;

use std::collections::BTreeMap;
use std::fmt;

use crate::experiment::ExperimentView;
use crate::schema::{
    Arm, ConfigError, Data, ModelKwargs, ModelRegistry, ObservationFeatures, PendingObservations,
    SearchSpace,
};

pub use local_search::LocalSearchModel;
pub use selector::{
    BestModelSelector, DiagnosticCriterion, MetricAggregation, SingleDiagnosticBestModelSelector,
};
pub use uniform::UniformModel;

/// Diagnostic name to metric name to value.
pub type CvDiagnostics = BTreeMap<String, BTreeMap<String, f64>>;

/// Mean absolute error diagnostic.
pub const MAE: &str = "MAE";
/// Root mean squared error diagnostic.
pub const RMSE: &str = "RMSE";

/// Inputs to one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenRequest<'a> {
    /// Number of arms to produce.
    pub n: usize,
    /// Points being evaluated that should not be re-suggested.
    pub pending_observations: &'a PendingObservations,
    /// Parameter values every arm must carry.
    pub fixed_features: Option<&'a ObservationFeatures>,
    /// Merged generation kwargs.
    pub kwargs: &'a ModelKwargs,
}

/// Leave-one-out prediction for one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CvResult {
    pub arm_name: String,
    pub metric_name: String,
    pub observed: f64,
    pub predicted: f64,
}

/// A model that can be fit to data and propose arms.
pub trait Model: fmt::Debug + Send {
    /// Fit to `data` over `search_space`.
    fn fit(
        &mut self,
        experiment: &dyn ExperimentView,
        search_space: &SearchSpace,
        data: &Data,
    ) -> Result<(), ModelError>;

    /// Propose arms.
    fn generate(&mut self, request: &GenRequest<'_>) -> Result<Vec<Arm>, ModelError>;

    /// Incorporate data for newly completed trials without re-fitting.
    fn update(
        &mut self,
        _experiment: &dyn ExperimentView,
        _new_data: &Data,
    ) -> Result<(), ModelError> {
        Err(ModelError::Unsupported("update".into()))
    }

    /// Leave-one-out predictions for the fitted data.
    fn cross_validate(&self, _kwargs: &ModelKwargs) -> Result<Vec<CvResult>, ModelError> {
        Err(ModelError::Unsupported("cross_validate".into()))
    }

    /// State to record on generator runs, used as kwargs when re-fitting.
    fn state_after_gen(&self) -> Option<ModelKwargs> {
        None
    }
}

impl ModelRegistry {
    /// Construct an unfitted model from kwargs.
    pub fn build(self, kwargs: &ModelKwargs) -> Result<Box<dyn Model>, ModelError> {
        Ok(match self {
            ModelRegistry::Uniform => Box::new(UniformModel::from_kwargs(kwargs)?),
            ModelRegistry::LocalSearch => Box::new(LocalSearchModel::from_kwargs(kwargs)?),
        })
    }
}

/// Summarize cross-validation results into per-metric diagnostics.
pub fn compute_diagnostics(results: &[CvResult]) -> CvDiagnostics {
    let mut errors: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in results {
        errors
            .entry(r.metric_name.as_str())
            .or_default()
            .push(r.predicted - r.observed);
    }

    let mut mae = BTreeMap::new();
    let mut rmse = BTreeMap::new();
    for (metric, errs) in errors {
        let n = errs.len() as f64;
        mae.insert(
            metric.to_string(),
            errs.iter().map(|e| e.abs()).sum::<f64>() / n,
        );
        rmse.insert(
            metric.to_string(),
            (errs.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
        );
    }

    CvDiagnostics::from([(MAE.to_string(), mae), (RMSE.to_string(), rmse)])
}

/// Read an optional unsigned integer kwarg.
pub(crate) fn kwarg_u64(kwargs: &ModelKwargs, name: &str) -> Result<Option<u64>, ModelError> {
    kwargs
        .get(name)
        .map(|v| {
            v.as_u64().ok_or_else(|| ModelError::InvalidKwarg {
                name: name.to_string(),
                reason: format!("expected unsigned integer, got {v}"),
            })
        })
        .transpose()
}

/// Read an optional float kwarg.
pub(crate) fn kwarg_f64(kwargs: &ModelKwargs, name: &str) -> Result<Option<f64>, ModelError> {
    kwargs
        .get(name)
        .map(|v| {
            v.as_f64().ok_or_else(|| ModelError::InvalidKwarg {
                name: name.to_string(),
                reason: format!("expected number, got {v}"),
            })
        })
        .transpose()
}

/// Read an optional boolean kwarg.
pub(crate) fn kwarg_bool(kwargs: &ModelKwargs, name: &str) -> Result<Option<bool>, ModelError> {
    kwargs
        .get(name)
        .map(|v| {
            v.as_bool().ok_or_else(|| ModelError::InvalidKwarg {
                name: name.to_string(),
                reason: format!("expected boolean, got {v}"),
            })
        })
        .transpose()
}

/// Read an optional string kwarg.
pub(crate) fn kwarg_str(kwargs: &ModelKwargs, name: &str) -> Result<Option<String>, ModelError> {
    kwargs
        .get(name)
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ModelError::InvalidKwarg {
                    name: name.to_string(),
                    reason: format!("expected string, got {v}"),
                })
        })
        .transpose()
}

/// Apply fixed features to a parameterization.
pub(crate) fn apply_fixed_features(arm: &mut Arm, fixed: Option<&ObservationFeatures>) {
    if let Some(fixed) = fixed {
        for (name, value) in &fixed.parameters {
            arm.parameters.insert(name.clone(), *value);
        }
    }
}

/// Model errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Model has not been fit")]
    NotFitted,
    #[error("Invalid kwarg `{name}`: {reason}")]
    InvalidKwarg { name: String, reason: String },
    #[error("Operation `{0}` is not supported by this model")]
    Unsupported(String),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Model selection failed: {0}")]
    Selection(String),
    #[error("Invalid search space: {0}")]
    SearchSpace(#[from] ConfigError),
}

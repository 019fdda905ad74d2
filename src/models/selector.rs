//! Choosing one fitted model among several using cross-validation diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CvDiagnostics, ModelError};

/// Picks the best model from per-model diagnostics.
pub trait BestModelSelector: fmt::Debug + Send + Sync {
    /// Index into `diagnostics` of the chosen model.
    fn best_diagnostic(&self, diagnostics: &[CvDiagnostics]) -> Result<usize, ModelError>;
}

/// How per-metric diagnostic values are combined into one score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MetricAggregation {
    #[default]
    Mean,
    Min,
    Max,
}

impl MetricAggregation {
    fn aggregate(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            MetricAggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            MetricAggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            MetricAggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Whether the best model has the smallest or largest score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DiagnosticCriterion {
    #[default]
    Min,
    Max,
}

/// Selects by a single diagnostic, aggregated across metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SingleDiagnosticBestModelSelector {
    /// Diagnostic name, e.g. `MAE`.
    pub diagnostic: String,
    #[serde(default)]
    pub metric_aggregation: MetricAggregation,
    #[serde(default)]
    pub criterion: DiagnosticCriterion,
    /// Metrics to aggregate over; all metrics if unset.
    #[serde(default)]
    pub metric_names: Option<Vec<String>>,
}

impl SingleDiagnosticBestModelSelector {
    pub fn new(
        diagnostic: impl Into<String>,
        metric_aggregation: MetricAggregation,
        criterion: DiagnosticCriterion,
    ) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            metric_aggregation,
            criterion,
            metric_names: None,
        }
    }

    /// Restrict aggregation to the given metrics.
    pub fn with_metric_names(mut self, metric_names: Vec<String>) -> Self {
        self.metric_names = Some(metric_names);
        self
    }

    fn score(&self, diagnostics: &CvDiagnostics) -> Result<f64, ModelError> {
        let by_metric = diagnostics.get(&self.diagnostic).ok_or_else(|| {
            ModelError::Selection(format!("diagnostic {} not computed", self.diagnostic))
        })?;

        let values: Vec<f64> = match &self.metric_names {
            Some(names) => names
                .iter()
                .map(|name| {
                    by_metric.get(name).copied().ok_or_else(|| {
                        ModelError::Selection(format!(
                            "no {} value for metric {name}",
                            self.diagnostic
                        ))
                    })
                })
                .collect::<Result<_, _>>()?,
            None => by_metric.values().copied().collect(),
        };

        self.metric_aggregation
            .aggregate(&values)
            .ok_or_else(|| ModelError::Selection(format!("no metrics for {}", self.diagnostic)))
    }
}

impl BestModelSelector for SingleDiagnosticBestModelSelector {
    fn best_diagnostic(&self, diagnostics: &[CvDiagnostics]) -> Result<usize, ModelError> {
        let scores = diagnostics
            .iter()
            .map(|d| self.score(d))
            .collect::<Result<Vec<_>, _>>()?;

        // First index wins ties.
        let mut best: Option<(usize, f64)> = None;
        for (i, score) in scores.into_iter().enumerate() {
            let better = match best {
                None => true,
                Some((_, current)) => match self.criterion {
                    DiagnosticCriterion::Min => score < current,
                    DiagnosticCriterion::Max => score > current,
                },
            };
            if better {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
            .ok_or_else(|| ModelError::Selection("no models to select from".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MAE, RMSE};
    use std::collections::BTreeMap;

    fn diag(mae: &[(&str, f64)]) -> CvDiagnostics {
        let by_metric: BTreeMap<String, f64> =
            mae.iter().map(|(m, v)| (m.to_string(), *v)).collect();
        CvDiagnostics::from([(MAE.to_string(), by_metric)])
    }

    fn selector(
        diagnostic: &str,
        aggregation: MetricAggregation,
        criterion: DiagnosticCriterion,
    ) -> SingleDiagnosticBestModelSelector {
        SingleDiagnosticBestModelSelector::new(diagnostic, aggregation, criterion)
    }

    #[test]
    fn test_min_mean() {
        let selector = selector(MAE, MetricAggregation::Mean, DiagnosticCriterion::Min);
        let diagnostics = [
            diag(&[("a", 1.0), ("b", 3.0)]),
            diag(&[("a", 1.5), ("b", 1.5)]),
            diag(&[("a", 0.5), ("b", 4.0)]),
        ];
        assert_eq!(selector.best_diagnostic(&diagnostics), Ok(1));
    }

    #[test]
    fn test_max_of_min() {
        let selector = selector(MAE, MetricAggregation::Min, DiagnosticCriterion::Max);
        let diagnostics = [diag(&[("a", 1.0), ("b", 3.0)]), diag(&[("a", 2.0), ("b", 2.5)])];
        assert_eq!(selector.best_diagnostic(&diagnostics), Ok(1));
    }

    #[test]
    fn test_restricted_metrics() {
        let selector = selector(MAE, MetricAggregation::Mean, DiagnosticCriterion::Min)
            .with_metric_names(vec!["b".into()]);
        let diagnostics = [diag(&[("a", 0.0), ("b", 3.0)]), diag(&[("a", 9.0), ("b", 1.0)])];
        assert_eq!(selector.best_diagnostic(&diagnostics), Ok(1));
    }

    #[test]
    fn test_missing_diagnostic() {
        let selector = selector(RMSE, MetricAggregation::Mean, DiagnosticCriterion::Min);
        assert!(matches!(
            selector.best_diagnostic(&[diag(&[("a", 1.0)])]),
            Err(ModelError::Selection(_))
        ));
    }
}

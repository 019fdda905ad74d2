//! Observed metric data attached to trials.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single metric observation for one arm of one trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub trial_index: usize,
    pub arm_name: String,
    pub metric_name: String,
    /// Observed mean.
    pub mean: f64,
    /// Standard error of the mean, if known.
    #[serde(default)]
    pub sem: Option<f64>,
}

/// Collection of observations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Data {
    pub observations: Vec<Observation>,
}

impl Data {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Trial indices that have at least one observation.
    pub fn trial_indices(&self) -> BTreeSet<usize> {
        self.observations.iter().map(|o| o.trial_index).collect()
    }

    /// Metric names present in the data.
    pub fn metric_names(&self) -> BTreeSet<&str> {
        self.observations
            .iter()
            .map(|o| o.metric_name.as_str())
            .collect()
    }

    /// Observations restricted to the given trials.
    pub fn filter_trials(&self, trial_indices: &BTreeSet<usize>) -> Data {
        Data {
            observations: self
                .observations
                .iter()
                .filter(|o| trial_indices.contains(&o.trial_index))
                .cloned()
                .collect(),
        }
    }

    /// Append observations from another data set.
    pub fn extend(&mut self, other: Data) {
        self.observations.extend(other.observations);
    }
}

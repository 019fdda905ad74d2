//! Experiment module - The trial bookkeeping the generation core reads from.
//!
//! The core never owns an experiment. Every operation that needs trial
//! statuses or data takes an [`ExperimentView`], which keeps generation steps
//! testable in isolation and avoids back-references from steps to their
//! strategy.

mod in_memory;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::schema::{Arm, Data, SearchSpace, TrialIndicesByStatus, TrialStatus};

pub use in_memory::{Experiment, Trial};

/// A metric tracked by an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub name: String,
    /// Whether data for this metric can be fetched before a trial completes.
    #[serde(default)]
    pub available_while_running: bool,
    /// Optimization direction, if this metric is an objective.
    #[serde(default)]
    pub lower_is_better: Option<bool>,
}

impl Metric {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available_while_running: false,
            lower_is_better: None,
        }
    }

    /// Mark the metric as reporting data for running trials.
    pub fn available_while_running(mut self) -> Self {
        self.available_while_running = true;
        self
    }
}

/// What the generation core needs to know about one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSummary {
    pub index: usize,
    pub status: TrialStatus,
    /// Step of the generation strategy that produced the trial.
    pub generation_step_index: Option<usize>,
}

/// Read interface over an experiment's trials, data and arms.
pub trait ExperimentView {
    /// Unique experiment name.
    fn name(&self) -> &str;

    fn search_space(&self) -> &SearchSpace;

    /// All trials, in index order.
    fn trial_summaries(&self) -> Vec<TrialSummary>;

    /// Arms of a trial; empty if the trial does not exist.
    fn trial_arms(&self, trial_index: usize) -> &[Arm];

    /// Observed data, optionally restricted to the given trials.
    fn lookup_data(&self, trial_indices: Option<&BTreeSet<usize>>) -> Data;

    fn metrics(&self) -> &[Metric];

    /// Every arm ever attached to a trial, keyed by signature.
    fn arms_by_signature(&self) -> &BTreeMap<String, Arm>;

    /// Arm attached to a trial, by name.
    fn arm(&self, name: &str) -> Option<&Arm>;

    fn status_quo(&self) -> Option<&Arm>;

    /// Trial indices grouped by current status.
    fn trial_indices_by_status(&self) -> TrialIndicesByStatus {
        TrialIndicesByStatus::from_pairs(
            self.trial_summaries()
                .into_iter()
                .map(|t| (t.index, t.status)),
        )
    }
}

/// Experiment bookkeeping errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExperimentError {
    #[error("Trial {0} does not exist")]
    UnknownTrial(usize),
    #[error("Trial {index} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        index: usize,
        from: TrialStatus,
        to: TrialStatus,
    },
    #[error("Observation for trial {trial_index} references unknown arm {arm_name}")]
    UnknownArm {
        trial_index: usize,
        arm_name: String,
    },
}

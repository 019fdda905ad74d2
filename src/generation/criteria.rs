//! Completion criteria for criteria-gated generation steps.

use std::fmt;
use std::sync::Arc;

use crate::experiment::ExperimentView;
use crate::schema::{CriterionSettings, TrialStatus};

/// A predicate over the experiment deciding when an unlimited step is done.
pub trait CompletionCriterion: fmt::Debug + Send + Sync {
    fn is_met(&self, experiment: &dyn ExperimentView) -> bool;

    /// Persistable form, if the criterion has one.
    fn to_settings(&self) -> Option<CriterionSettings> {
        None
    }
}

/// Met once the experiment has at least `threshold` trials in `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimumTrialsInStatus {
    pub status: TrialStatus,
    pub threshold: usize,
}

impl CompletionCriterion for MinimumTrialsInStatus {
    fn is_met(&self, experiment: &dyn ExperimentView) -> bool {
        experiment
            .trial_indices_by_status()
            .with_status(self.status)
            .len()
            >= self.threshold
    }

    fn to_settings(&self) -> Option<CriterionSettings> {
        Some(CriterionSettings::MinimumTrialsInStatus {
            status: self.status,
            threshold: self.threshold,
        })
    }
}

impl CriterionSettings {
    /// Build the criterion this setting describes.
    pub fn build(&self) -> Arc<dyn CompletionCriterion> {
        match *self {
            CriterionSettings::MinimumTrialsInStatus { status, threshold } => {
                Arc::new(MinimumTrialsInStatus { status, threshold })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Experiment;
    use crate::schema::{Arm, GeneratorRun, RangeParameter, SearchSpace};

    #[test]
    fn test_minimum_trials_in_status() {
        let mut exp = Experiment::new(
            "test",
            SearchSpace::new(vec![RangeParameter::float("x", 0.0, 1.0)]),
        );
        let criterion = CriterionSettings::MinimumTrialsInStatus {
            status: TrialStatus::Completed,
            threshold: 2,
        }
        .build();

        for x in [0.1, 0.2] {
            let idx = exp.new_trial(&GeneratorRun::new(vec![Arm::from_pairs([("x", x)])], "T"));
            exp.mark_running(idx).unwrap();
            assert!(!criterion.is_met(&exp));
            exp.mark_completed(idx).unwrap();
        }
        assert!(criterion.is_met(&exp));
        assert_eq!(
            criterion.to_settings(),
            Some(CriterionSettings::MinimumTrialsInStatus {
                status: TrialStatus::Completed,
                threshold: 2,
            })
        );
    }
}

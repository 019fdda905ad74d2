//! Trial lifecycle statuses.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

static NO_TRIALS: BTreeSet<usize> = BTreeSet::new();

/// Lifecycle status of a trial.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrialStatus {
    /// Created but not yet deployed.
    Candidate,
    /// Deployed, waiting to start.
    Staged,
    /// Being evaluated.
    Running,
    /// Evaluated successfully.
    Completed,
    /// Evaluation failed.
    Failed,
    /// Abandoned before completion.
    Abandoned,
    /// Stopped early; its partial data is still usable.
    EarlyStopped,
}

impl TrialStatus {
    pub const ALL: [TrialStatus; 7] = [
        TrialStatus::Candidate,
        TrialStatus::Staged,
        TrialStatus::Running,
        TrialStatus::Completed,
        TrialStatus::Failed,
        TrialStatus::Abandoned,
        TrialStatus::EarlyStopped,
    ];

    #[inline]
    pub fn is_running(self) -> bool {
        self == TrialStatus::Running
    }

    /// Whether the trial can no longer change status.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrialStatus::Completed
                | TrialStatus::Failed
                | TrialStatus::Abandoned
                | TrialStatus::EarlyStopped
        )
    }

    /// Terminal without usable data.
    #[inline]
    pub fn is_failed_or_abandoned(self) -> bool {
        matches!(self, TrialStatus::Failed | TrialStatus::Abandoned)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialStatus::Candidate => "CANDIDATE",
            TrialStatus::Staged => "STAGED",
            TrialStatus::Running => "RUNNING",
            TrialStatus::Completed => "COMPLETED",
            TrialStatus::Failed => "FAILED",
            TrialStatus::Abandoned => "ABANDONED",
            TrialStatus::EarlyStopped => "EARLY_STOPPED",
        };
        f.write_str(name)
    }
}

/// Trial indices grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialIndicesByStatus(BTreeMap<TrialStatus, BTreeSet<usize>>);

impl TrialIndicesByStatus {
    /// Group `(trial_index, status)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (usize, TrialStatus)>) -> Self {
        let mut by_status: BTreeMap<TrialStatus, BTreeSet<usize>> = BTreeMap::new();
        for (index, status) in pairs {
            by_status.entry(status).or_default().insert(index);
        }
        Self(by_status)
    }

    /// Trials currently in `status`.
    pub fn with_status(&self, status: TrialStatus) -> &BTreeSet<usize> {
        self.0.get(&status).unwrap_or(&NO_TRIALS)
    }

    /// Trials in any of `statuses`.
    pub fn with_any_status(&self, statuses: &[TrialStatus]) -> BTreeSet<usize> {
        statuses
            .iter()
            .flat_map(|s| self.with_status(*s).iter().copied())
            .collect()
    }
}

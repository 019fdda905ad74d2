//! Arms, observation features and pending observations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameter name to value.
pub type Parameterization = BTreeMap<String, f64>;

/// One concrete parameterization proposed for evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Arm {
    /// Name assigned when the arm is attached to a trial.
    #[serde(default)]
    pub name: Option<String>,
    /// Parameter values.
    pub parameters: Parameterization,
}

impl Arm {
    pub fn new(parameters: Parameterization) -> Self {
        Self {
            name: None,
            parameters,
        }
    }

    /// Build an arm from `(name, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self::new(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Copy of this arm carrying a name.
    pub fn named(&self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            parameters: self.parameters.clone(),
        }
    }

    /// Identity of the parameterization, independent of the arm name.
    ///
    /// Parameters are visited in key order and values are printed with full
    /// precision, so two arms share a signature iff their parameters are equal.
    pub fn signature(&self) -> String {
        self.parameters
            .iter()
            .map(|(k, v)| format!("{k}={v:?}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Features of a point a model should treat as observed or pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationFeatures {
    pub parameters: Parameterization,
    #[serde(default)]
    pub trial_index: Option<usize>,
}

impl ObservationFeatures {
    pub fn from_arm(arm: &Arm, trial_index: Option<usize>) -> Self {
        Self {
            parameters: arm.parameters.clone(),
            trial_index,
        }
    }
}

/// Metric name to the points currently being evaluated for it.
pub type PendingObservations = BTreeMap<String, Vec<ObservationFeatures>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_ignores_name() {
        let a = Arm::from_pairs([("x", 0.5), ("y", 1.0)]);
        let b = a.named("0_0");
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_signature_distinguishes_values() {
        let a = Arm::from_pairs([("x", 0.5)]);
        let b = Arm::from_pairs([("x", 0.5000001)]);
        assert_ne!(a.signature(), b.signature());
    }
}

//! Search space types describing which parameterizations can be proposed.

use serde::{Deserialize, Serialize};

use super::{ConfigError, Parameterization};

/// Value domain of a range parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ParameterType {
    /// Continuous value in `[lower, upper]`.
    #[default]
    Float,
    /// Integer value in `[lower, upper]`, stored as a whole-number `f64`.
    Int,
}

/// A bounded numeric parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RangeParameter {
    /// Parameter name, unique within a search space.
    pub name: String,
    /// Inclusive lower bound.
    pub lower: f64,
    /// Inclusive upper bound.
    pub upper: f64,
    /// Value domain.
    #[serde(default)]
    pub parameter_type: ParameterType,
}

impl RangeParameter {
    /// Create a float parameter.
    pub fn float(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
            parameter_type: ParameterType::Float,
        }
    }

    /// Create an integer parameter.
    pub fn int(name: impl Into<String>, lower: i64, upper: i64) -> Self {
        Self {
            name: name.into(),
            lower: lower as f64,
            upper: upper as f64,
            parameter_type: ParameterType::Int,
        }
    }

    /// Width of the range.
    #[inline]
    pub fn span(&self) -> f64 {
        self.upper - self.lower
    }

    /// Clamp a value into the domain, rounding integer parameters.
    pub fn cast(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.lower, self.upper);
        match self.parameter_type {
            ParameterType::Float => clamped,
            ParameterType::Int => clamped.round(),
        }
    }
}

/// Set of parameters that arms are drawn from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchSpace {
    pub parameters: Vec<RangeParameter>,
}

impl SearchSpace {
    pub fn new(parameters: Vec<RangeParameter>) -> Self {
        Self { parameters }
    }

    /// Number of parameters.
    pub fn dimension(&self) -> usize {
        self.parameters.len()
    }

    /// Whether a parameterization lies within the search space.
    pub fn contains(&self, parameterization: &Parameterization) -> bool {
        self.parameters.iter().all(|p| {
            parameterization
                .get(&p.name)
                .is_some_and(|v| *v >= p.lower && *v <= p.upper)
        })
    }

    /// Validate parameter names and bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parameters.is_empty() {
            return Err(ConfigError::EmptySearchSpace);
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if p.lower.is_nan() || p.upper.is_nan() || p.lower > p.upper {
                return Err(ConfigError::InvalidBounds(format!(
                    "{} min ({}) > max ({})",
                    p.name, p.lower, p.upper
                )));
            }
            if !p.span().is_finite() {
                return Err(ConfigError::InvalidBounds(format!(
                    "{} range [{}, {}] is not finite",
                    p.name, p.lower, p.upper
                )));
            }
            if self.parameters[..i].iter().any(|q| q.name == p.name) {
                return Err(ConfigError::DuplicateParameter(p.name.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_int_parameter() {
        let p = RangeParameter::int("k", 1, 8);
        assert_eq!(p.cast(3.4), 3.0);
        assert_eq!(p.cast(12.0), 8.0);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let space = SearchSpace::new(vec![RangeParameter::float("x", 1.0, 0.0)]);
        assert!(matches!(space.validate(), Err(ConfigError::InvalidBounds(_))));
    }

    #[test]
    fn test_validate_rejects_unbounded_ranges() {
        let infinite = SearchSpace::new(vec![RangeParameter::float("x", 0.0, f64::INFINITY)]);
        assert!(matches!(
            infinite.validate(),
            Err(ConfigError::InvalidBounds(_))
        ));

        // Both bounds are finite but their difference overflows.
        let overflowing = SearchSpace::new(vec![RangeParameter::float("x", -1e308, 1e308)]);
        assert!(matches!(
            overflowing.validate(),
            Err(ConfigError::InvalidBounds(_))
        ));

        let wide = SearchSpace::new(vec![RangeParameter::float("x", -1e307, 1e307)]);
        assert!(wide.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let space = SearchSpace::new(vec![
            RangeParameter::float("x", 0.0, 1.0),
            RangeParameter::float("x", 0.0, 2.0),
        ]);
        assert!(matches!(
            space.validate(),
            Err(ConfigError::DuplicateParameter(_))
        ));
    }
}

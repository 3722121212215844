//! Objective vectors and transitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CmorlError, Result};

/// One quality signal per tracked objective, each conventionally in `[0, 1]`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectiveVector(Vec<f64>);

impl ObjectiveVector {
    /// Wrap without checking the domain
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// Wrap, rejecting negative or non-finite entries
    pub fn validated(values: Vec<f64>) -> Result<Self> {
        let vector = Self(values);
        vector.check_domain()?;
        Ok(vector)
    }

    /// Every entry must be finite and non-negative
    pub fn check_domain(&self) -> Result<()> {
        match self
            .0
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            Some((index, value)) => Err(CmorlError::DomainViolation {
                index,
                value: *value,
            }),
            None => Ok(()),
        }
    }

    /// Width must equal `expected`
    pub fn check_width(&self, expected: usize) -> Result<()> {
        if self.0.len() != expected {
            return Err(CmorlError::DimensionMismatch {
                expected,
                actual: self.0.len(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl AsRef<[f64]> for ObjectiveVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

impl From<Vec<f64>> for ObjectiveVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl FromIterator<f64> for ObjectiveVector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One environment step as seen by a reward function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transition {
    /// Observation before the action
    pub state: Vec<f64>,
    /// Action taken
    pub action: Vec<f64>,
    /// Observation after the action
    pub next_state: Vec<f64>,
    /// Episode terminated
    pub done: bool,
    /// Auxiliary environment-specific fields
    #[serde(default)]
    pub info: HashMap<String, serde_json::Value>,
}

impl Transition {
    pub fn new(state: Vec<f64>, action: Vec<f64>, next_state: Vec<f64>, done: bool) -> Self {
        Self {
            state,
            action,
            next_state,
            done,
            info: HashMap::new(),
        }
    }

    pub fn with_info(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.info.insert(key.into(), value);
        self
    }

    /// Numeric info field
    pub fn info_f64(&self, key: &str) -> Option<f64> {
        self.info.get(key).and_then(|v| v.as_f64())
    }

    /// Numeric array info field; `None` if absent or not all numbers
    pub fn info_vec(&self, key: &str) -> Option<Vec<f64>> {
        self.info
            .get(key)?
            .as_array()?
            .iter()
            .map(|v| v.as_f64())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_rejects_negative_and_nan() {
        assert!(ObjectiveVector::validated(vec![0.0, 0.5, 1.0]).is_ok());

        match ObjectiveVector::validated(vec![0.5, -0.1]) {
            Err(CmorlError::DomainViolation { index, .. }) => assert_eq!(index, 1),
            other => panic!("Expected DomainViolation, got {:?}", other),
        }
        assert!(ObjectiveVector::validated(vec![f64::NAN]).is_err());
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let v = ObjectiveVector::new(vec![0.25, 1.0]);
        assert_eq!(serde_json::to_string(&v).unwrap(), "[0.25,1.0]");
        let back: ObjectiveVector = serde_json::from_str("[0.5,0.0]").unwrap();
        assert_eq!(back.as_slice(), &[0.5, 0.0]);
    }

    #[test]
    fn test_info_accessors() {
        let t = Transition::new(vec![], vec![0.1], vec![], false)
            .with_info("forward", serde_json::json!(0.4))
            .with_info("change_direction", serde_json::json!([0.1, 0.2]))
            .with_info("label", serde_json::json!("x"));

        assert_eq!(t.info_f64("forward"), Some(0.4));
        assert_eq!(t.info_vec("change_direction"), Some(vec![0.1, 0.2]));
        assert_eq!(t.info_f64("label"), None);
        assert_eq!(t.info_vec("missing"), None);
    }
}

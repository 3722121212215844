//! Finite-difference velocity of tracked bodies

use cmorl_core::{CmorlError, Result};
use serde::{Deserialize, Serialize};

/// Remembers the previous positions so consecutive calls yield velocities
///
/// Owned by the caller's environment view. The first call after
/// construction or [`reset`](Self::reset) reports zero velocity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityEstimator {
    previous: Option<Vec<f64>>,
}

impl VelocityEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(positions - previous) / dt`, then remember `positions`
    pub fn update(&mut self, positions: &[f64], dt: f64) -> Result<Vec<f64>> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(CmorlError::InvalidParameter(format!(
                "dt must be positive, got {}",
                dt
            )));
        }

        let velocity = match &self.previous {
            Some(previous) if previous.len() != positions.len() => {
                return Err(CmorlError::DimensionMismatch {
                    expected: previous.len(),
                    actual: positions.len(),
                });
            }
            Some(previous) => positions
                .iter()
                .zip(previous)
                .map(|(now, before)| (now - before) / dt)
                .collect(),
            None => vec![0.0; positions.len()],
        };

        self.previous = Some(positions.to_vec());
        Ok(velocity)
    }

    /// Forget the previous positions, e.g. at episode start
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn is_primed(&self) -> bool {
        self.previous.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_is_zero() {
        let mut est = VelocityEstimator::new();
        assert!(!est.is_primed());
        assert_eq!(est.update(&[1.0, 2.0], 0.1).unwrap(), vec![0.0, 0.0]);
        assert!(est.is_primed());
    }

    #[test]
    fn test_finite_difference() {
        let mut est = VelocityEstimator::new();
        est.update(&[0.0, 1.0], 0.5).unwrap();
        let v = est.update(&[1.0, 0.5], 0.5).unwrap();
        assert_eq!(v, vec![2.0, -1.0]);
    }

    #[test]
    fn test_reset_and_errors() {
        let mut est = VelocityEstimator::new();
        est.update(&[0.0], 0.1).unwrap();
        assert!(matches!(
            est.update(&[0.0, 1.0], 0.1),
            Err(CmorlError::DimensionMismatch { .. })
        ));
        assert!(est.update(&[0.0], 0.0).is_err());

        est.reset();
        assert_eq!(est.update(&[5.0, 6.0], 0.1).unwrap(), vec![0.0, 0.0]);
    }
}

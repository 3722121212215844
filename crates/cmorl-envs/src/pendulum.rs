//! Pendulum: swing up and hold the pole with little torque

use std::f64::consts::PI;

use cmorl_core::composer::{Composer, Composition, PowerParams, ReductionOrder};
use cmorl_core::{
    Cmorl, CmorlError, ObjectiveDef, ObjectiveVector, PowerMean, Result, RewardFunction, Tape,
    Tensor, Transition,
};
use serde::{Deserialize, Serialize};

/// Physical state the reward needs beyond the transition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendulumState {
    /// Pole angle, radians, 0 is upright
    pub theta: f64,
    /// Angular velocity
    pub theta_dot: f64,
    pub max_torque: f64,
    pub max_speed: f64,
}

impl Default for PendulumState {
    fn default() -> Self {
        Self {
            theta: 0.0,
            theta_dot: 0.0,
            max_torque: 2.0,
            max_speed: 8.0,
        }
    }
}

/// Shortest angular distance from `a` to `b`, scaled to `[0, 1]`
pub fn normed_angular_distance(a: f64, b: f64) -> f64 {
    let diff = (b - a + PI).rem_euclid(2.0 * PI) - PI;
    let diff = if diff < -PI { diff + 2.0 * PI } else { diff };
    diff.abs() / PI
}

/// The pendulum has a single torque input
fn torque(transition: &Transition) -> Result<f64> {
    match transition.action.as_slice() {
        [u] => Ok(*u),
        other => Err(CmorlError::DimensionMismatch {
            expected: 1,
            actual: other.len(),
        }),
    }
}

/// `[angle, actuation]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendulumReward {
    /// Target angle
    pub setpoint: f64,
}

impl PendulumReward {
    pub fn new(setpoint: f64) -> Self {
        Self { setpoint }
    }
}

impl RewardFunction for PendulumReward {
    type Env = PendulumState;

    fn objectives(
        &self,
        transition: &Transition,
        env: &mut PendulumState,
    ) -> Result<ObjectiveVector> {
        let u = torque(transition)?;
        let angle = 1.0 - (normed_angular_distance(env.theta, self.setpoint) * 2.0).clamp(0.0, 1.0);
        let normalized = (u / env.max_torque).abs();
        let actuation = (1.0 - normalized * normalized).max(0.0);
        Ok(ObjectiveVector::new(vec![angle, actuation]))
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        vec![
            ObjectiveDef::new("angle")
                .describe("closeness to the setpoint, 1 within a quarter turn"),
            ObjectiveDef::new("actuation").describe("1 minus squared normalized torque"),
        ]
    }
}

/// Squares the angle objective, then combines per sample before the batch
#[derive(Debug, Clone, Default)]
pub struct PendulumComposer;

impl Composer for PendulumComposer {
    fn name(&self) -> &str {
        "pendulum"
    }

    fn num_objectives(&self) -> usize {
        2
    }

    fn aggregate_names(&self) -> Vec<String> {
        vec!["angle".into(), "actuation".into()]
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::ObjectivesThenBatch
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let angle = batch.column(0)?.map(|v| tape.powf(v, 2.0));
        let actuation = batch.column(1)?;
        let shaped = Tensor::stack(&[angle, actuation])?;

        let over_batch = PowerMean::new(powers.p_batch);
        let per_sample = PowerMean::new(powers.p_objectives).reduce(tape, &shaped, Some(0))?;
        Ok(Composition {
            per_objective: over_batch.reduce(tape, &shaped, Some(1))?,
            scalar: over_batch.reduce_all(tape, &per_sample),
        })
    }
}

pub fn cmorl(setpoint: f64) -> Result<Cmorl<PendulumReward, PendulumComposer>> {
    Cmorl::new(PendulumReward::new(setpoint), PendulumComposer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angular_distance() {
        assert_eq!(normed_angular_distance(0.0, 0.0), 0.0);
        assert!((normed_angular_distance(0.0, PI) - 1.0).abs() < 1e-12);
        assert!((normed_angular_distance(0.0, -PI / 2.0) - 0.5).abs() < 1e-12);
        // wraps around
        assert!((normed_angular_distance(0.1, 2.0 * PI - 0.1) - 0.2 / PI).abs() < 1e-9);
    }

    #[test]
    fn test_upright_without_torque_is_perfect() {
        let unit = cmorl(0.0).unwrap();
        let mut state = PendulumState::default();
        let t = Transition::new(vec![], vec![0.0], vec![], false);
        assert_eq!(unit.reward(&t, &mut state).unwrap().as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn test_hanging_with_full_torque() {
        let unit = cmorl(0.0).unwrap();
        let mut state = PendulumState {
            theta: PI,
            ..PendulumState::default()
        };
        let t = Transition::new(vec![], vec![2.0], vec![], false);
        let r = unit.reward(&t, &mut state).unwrap();
        assert_eq!(r.as_slice(), &[0.0, 0.0]);
    }

    #[test]
    fn test_composer_squares_angle() {
        let unit = cmorl(0.0).unwrap();
        let batch = vec![vec![0.5, 1.0]];
        let out = unit.q_composer(&batch, PowerParams::new(1.0, 1.0)).unwrap();
        assert!((out.per_objective[0] - 0.25).abs() < 1e-6);
        assert!((out.per_objective[1] - 1.0).abs() < 1e-6);
        assert!((out.scalar - 0.625).abs() < 1e-6);
    }
}

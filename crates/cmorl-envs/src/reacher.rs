//! Reacher: bring the fingertip to the target with smooth actuation

use cmorl_core::composer::{Composer, Composition, PowerParams, ReductionOrder};
use cmorl_core::{
    Cmorl, CmorlError, ObjectiveDef, ObjectiveVector, PowerMean, Result, RewardFunction, Tape,
    Tensor, Transition,
};
use serde::{Deserialize, Serialize};

/// Fingertip-to-target distance at which `reach` reaches 0
const REACH_RADIUS: f64 = 0.4;
/// Action magnitude at which actuation reaches 0
const ACTION_SCALE: f64 = 0.4;

/// `[reach, actuation per joint...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReacherReward {
    pub num_actions: usize,
}

impl ReacherReward {
    pub fn new(num_actions: usize) -> Self {
        Self { num_actions }
    }
}

impl Default for ReacherReward {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RewardFunction for ReacherReward {
    type Env = ();

    fn objectives(&self, transition: &Transition, _env: &mut ()) -> Result<ObjectiveVector> {
        let obs = &transition.next_state;
        // fingertip - target occupies the two entries before the last
        if obs.len() < 3 {
            return Err(CmorlError::ShapeError(format!(
                "reacher observation needs at least 3 entries, got {}",
                obs.len()
            )));
        }
        let delta = &obs[obs.len() - 3..obs.len() - 1];
        let distance = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        let reach = 1.0 - (distance / REACH_RADIUS).clamp(0.0, 1.0);

        let mut out = Vec::with_capacity(1 + transition.action.len());
        out.push(reach);
        out.extend(transition.action.iter().map(|a| {
            let scaled = a / ACTION_SCALE;
            (1.0 - scaled * scaled).clamp(0.0, 1.0)
        }));
        Ok(ObjectiveVector::new(out))
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        let mut defs = vec![ObjectiveDef::new("reach").describe("1 at the target, 0 beyond 0.4")];
        defs.extend(ObjectiveDef::numbered("actuation", self.num_actions));
        defs
    }
}

/// `reach²` against the geometric mean of the actuation objectives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReacherComposer {
    pub num_actions: usize,
}

impl Composer for ReacherComposer {
    fn name(&self) -> &str {
        "reacher"
    }

    fn num_objectives(&self) -> usize {
        1 + self.num_actions
    }

    fn aggregate_names(&self) -> Vec<String> {
        vec!["smoothness".into(), "reach".into()]
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::ObjectivesThenBatch
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let reach = batch.column(0)?.map(|v| tape.powf(v, 2.0));
        let actuation = batch.columns(1..1 + self.num_actions)?;
        let smoothness = PowerMean::new(0.0).reduce(tape, &actuation, Some(1))?;

        let shaped = Tensor::stack(&[smoothness, reach])?;
        let over_batch = PowerMean::new(powers.p_batch);
        let per_sample = PowerMean::new(powers.p_objectives).reduce(tape, &shaped, Some(0))?;
        Ok(Composition {
            per_objective: over_batch.reduce(tape, &shaped, Some(1))?,
            scalar: over_batch.reduce_all(tape, &per_sample),
        })
    }
}

pub fn cmorl(num_actions: usize) -> Result<Cmorl<ReacherReward, ReacherComposer>> {
    Cmorl::new(
        ReacherReward::new(num_actions),
        ReacherComposer { num_actions },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(dx: f64, dy: f64) -> Vec<f64> {
        let mut obs = vec![0.0; 8];
        obs.extend([dx, dy, 0.0]);
        obs
    }

    #[test]
    fn test_reach_and_actuation() {
        let unit = cmorl(2).unwrap();
        let t = Transition::new(vec![], vec![0.0, 0.2], observation(0.0, 0.2), false);
        let r = unit.reward(&t, &mut ()).unwrap();
        assert!((r.as_slice()[0] - 0.5).abs() < 1e-12);
        assert_eq!(r.as_slice()[1], 1.0);
        assert!((r.as_slice()[2] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_far_target_and_large_action_floor_at_zero() {
        let unit = cmorl(2).unwrap();
        let t = Transition::new(vec![], vec![1.0, -1.0], observation(3.0, 4.0), false);
        let r = unit.reward(&t, &mut ()).unwrap();
        assert_eq!(r.as_slice(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_short_observation_rejected() {
        let unit = cmorl(2).unwrap();
        let t = Transition::new(vec![], vec![0.0, 0.0], vec![0.0, 0.0], false);
        assert!(matches!(unit.reward(&t, &mut ()), Err(CmorlError::ShapeError(_))));
    }

    #[test]
    fn test_composer_aggregates() {
        let unit = cmorl(2).unwrap();
        let batch = vec![vec![1.0, 1.0, 1.0], vec![0.5, 1.0, 1.0]];
        let out = unit.q_composer(&batch, PowerParams::new(1.0, 1.0)).unwrap();
        assert_eq!(out.per_objective.len(), 2);
        assert!((out.per_objective[0] - 1.0).abs() < 1e-6);
        assert!((out.per_objective[1] - 0.625).abs() < 1e-6);
        assert!((out.scalar - 0.8125).abs() < 1e-6);
    }
}

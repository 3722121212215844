//! Bittle quadruped: forward progress and gait consistency from env info

use cmorl_core::composer::{PMeanComposer, ReductionOrder};
use cmorl_core::{
    Cmorl, CmorlError, ObjectiveDef, ObjectiveVector, Result, RewardFunction, Transition,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of actuated joints on the robot
pub const NUM_JOINTS: usize = 8;

/// `[forward, change_direction per joint...]`, read from `info`
///
/// Missing fields count as 0. Values are clamped into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BittleReward {
    pub num_joints: usize,
}

impl Default for BittleReward {
    fn default() -> Self {
        Self {
            num_joints: NUM_JOINTS,
        }
    }
}

impl RewardFunction for BittleReward {
    type Env = ();

    fn objectives(&self, transition: &Transition, _env: &mut ()) -> Result<ObjectiveVector> {
        let forward = transition.info_f64("forward").unwrap_or(0.0);
        let change_direction = match transition.info_vec("change_direction") {
            Some(values) if values.len() != self.num_joints => {
                return Err(CmorlError::DimensionMismatch {
                    expected: self.num_joints,
                    actual: values.len(),
                });
            }
            Some(values) => values,
            None => {
                if transition.info.contains_key("change_direction") {
                    warn!("change_direction is not a numeric array, treating as zero");
                }
                vec![0.0; self.num_joints]
            }
        };

        Ok(std::iter::once(forward)
            .chain(change_direction)
            .map(|v| v.clamp(0.0, 1.0))
            .collect())
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        let mut defs = vec![ObjectiveDef::new("forward")];
        defs.extend(ObjectiveDef::numbered("change_direction", self.num_joints));
        defs
    }
}

pub fn cmorl() -> Result<Cmorl<BittleReward, PMeanComposer>> {
    let reward = BittleReward::default();
    let width = 1 + reward.num_joints;
    Cmorl::new(
        reward,
        PMeanComposer::new(width, ReductionOrder::ObjectivesThenBatch),
    )
}

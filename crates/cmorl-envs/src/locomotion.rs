//! Legged locomotion: move every body forward without thrashing the joints
//!
//! Speeds come from the x position of each body, differenced by the
//! [`VelocityEstimator`] held in [`LocomotionEnv`]. Index 0 of the position
//! vector is the world body and is ignored.

use cmorl_core::composer::{Composer, Composition, PowerParams, ReductionOrder};
use cmorl_core::shaping::then;
use cmorl_core::{
    Cmorl, CmorlError, ObjectiveDef, ObjectiveVector, PowerMean, Result, RewardFunction, Tape,
    Tensor, Transition, p_mean,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::velocity::VelocityEstimator;

/// Caller-owned view of the simulated bodies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocomotionEnv {
    /// x coordinate of every body, world body first
    pub positions: Vec<f64>,
    /// Simulation time per step
    pub dt: f64,
    pub velocity: VelocityEstimator,
}

impl LocomotionEnv {
    pub fn new(dt: f64) -> Self {
        Self {
            positions: Vec::new(),
            dt,
            velocity: VelocityEstimator::new(),
        }
    }

    /// Record the positions reached after a step
    pub fn observe(&mut self, positions: Vec<f64>) {
        self.positions = positions;
    }

    /// Start of a new episode
    pub fn reset(&mut self, positions: Vec<f64>) {
        self.velocity.reset();
        self.positions = positions;
    }

    /// x velocity of every non-world body
    fn body_speeds(&mut self, num_bodies: usize) -> Result<Vec<f64>> {
        if self.positions.len() != num_bodies + 1 {
            return Err(CmorlError::DimensionMismatch {
                expected: num_bodies + 1,
                actual: self.positions.len(),
            });
        }
        let mut velocities = self.velocity.update(&self.positions, self.dt)?;
        velocities.remove(0);
        trace!(?velocities, "body velocities");
        Ok(velocities)
    }
}

fn check_actions(transition: &Transition, num_actions: usize) -> Result<()> {
    if transition.action.len() != num_actions {
        return Err(CmorlError::DimensionMismatch {
            expected: num_actions,
            actual: transition.action.len(),
        });
    }
    Ok(())
}

/// `[speed per body..., action per joint...]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocomotionReward {
    pub num_bodies: usize,
    pub num_actions: usize,
    pub speed_multiplier: f64,
    pub action_multiplier: f64,
}

impl LocomotionReward {
    pub fn new(num_bodies: usize, num_actions: usize) -> Self {
        Self {
            num_bodies,
            num_actions,
            speed_multiplier: 1.0,
            action_multiplier: 1.0,
        }
    }

    pub fn with_speed_multiplier(mut self, multiplier: f64) -> Self {
        self.speed_multiplier = multiplier;
        self
    }

    pub fn with_action_multiplier(mut self, multiplier: f64) -> Self {
        self.action_multiplier = multiplier;
        self
    }
}

impl RewardFunction for LocomotionReward {
    type Env = LocomotionEnv;

    fn objectives(
        &self,
        transition: &Transition,
        env: &mut LocomotionEnv,
    ) -> Result<ObjectiveVector> {
        check_actions(transition, self.num_actions)?;
        let speeds = env.body_speeds(self.num_bodies)?;

        let speed = speeds
            .iter()
            .map(|v| (v * self.speed_multiplier).clamp(0.0, 1.0));
        let action = transition.action.iter().map(|a| {
            let scaled = (a * self.action_multiplier).abs();
            (1.0 - scaled * scaled).clamp(0.0, 1.0)
        });
        Ok(speed.chain(action).collect())
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        let mut defs = ObjectiveDef::numbered("speed", self.num_bodies);
        defs.extend(ObjectiveDef::numbered("action", self.num_actions));
        defs
    }
}

/// Speed and action groups combined per sample, then averaged over the batch
///
/// Speeds are folded with a harmonic mean, actions with a geometric one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocomotionComposer {
    pub num_bodies: usize,
    pub num_actions: usize,
}

impl Composer for LocomotionComposer {
    fn name(&self) -> &str {
        "locomotion"
    }

    fn num_objectives(&self) -> usize {
        self.num_bodies + self.num_actions
    }

    fn aggregate_names(&self) -> Vec<String> {
        vec!["speed".into(), "action".into()]
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::ObjectivesThenBatch
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let speed_cols = batch.columns(0..self.num_bodies)?;
        let action_cols = batch.columns(self.num_bodies..self.num_objectives())?;

        let speed = PowerMean::new(-1.0).reduce(tape, &speed_cols, Some(1))?;
        let action = PowerMean::new(0.0)
            .reduce(tape, &action_cols, Some(1))?
            .map(|v| tape.clamp(v, 0.0, 1.0));

        let shaped = Tensor::stack(&[speed, action])?;
        let per_sample = PowerMean::new(powers.p_objectives).reduce(tape, &shaped, Some(0))?;
        Ok(Composition {
            per_objective: PowerMean::new(1.0).reduce(tape, &shaped, Some(1))?,
            scalar: PowerMean::new(powers.p_batch).reduce_all(tape, &per_sample),
        })
    }
}

/// Walker variant: each objective is averaged over the batch first
///
/// Speed and action groups are then folded geometrically and combined with
/// `p_objectives`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkerComposer {
    pub num_bodies: usize,
    pub num_actions: usize,
}

impl Composer for WalkerComposer {
    fn name(&self) -> &str {
        "walker"
    }

    fn num_objectives(&self) -> usize {
        self.num_bodies + self.num_actions
    }

    fn aggregate_names(&self) -> Vec<String> {
        vec!["speed".into(), "action".into()]
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::BatchThenObjectives
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let over_batch = PowerMean::new(powers.p_batch).reduce(tape, batch, Some(0))?;
        let geometric = PowerMean::new(0.0);
        let speed = geometric.reduce_all(tape, &over_batch.slice(0..self.num_bodies)?);
        let action = geometric.reduce_all(
            tape,
            &over_batch.slice(self.num_bodies..self.num_objectives())?,
        );

        let per_objective = Tensor::vector(vec![speed, action]);
        let scalar = PowerMean::new(powers.p_objectives).reduce_all(tape, &per_objective);
        Ok(Composition {
            per_objective,
            scalar,
        })
    }
}

/// `[slow, fast, action per joint...]`
///
/// `slow` saturates at unit speed, `fast` at five times that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfCheetahReward {
    pub num_bodies: usize,
    pub num_actions: usize,
}

impl Default for HalfCheetahReward {
    fn default() -> Self {
        Self {
            num_bodies: 7,
            num_actions: 6,
        }
    }
}

impl RewardFunction for HalfCheetahReward {
    type Env = LocomotionEnv;

    fn objectives(
        &self,
        transition: &Transition,
        env: &mut LocomotionEnv,
    ) -> Result<ObjectiveVector> {
        check_actions(transition, self.num_actions)?;
        let speeds = env.body_speeds(self.num_bodies)?;

        let slow_speeds: Vec<f64> = speeds.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        let fast_speeds: Vec<f64> = speeds.iter().map(|v| (v * 0.2).clamp(0.0, 1.0)).collect();
        let slow = p_mean(&slow_speeds, 0.0).sqrt();
        let fast = p_mean(&fast_speeds, 0.0);

        let mut out = vec![slow, fast];
        out.extend(transition.action.iter().map(|a| (1.0 - a * a).max(0.0)));
        Ok(ObjectiveVector::new(out))
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        let mut defs = vec![
            ObjectiveDef::new("slow").describe("geometric body speed, saturating at 1"),
            ObjectiveDef::new("fast").describe("geometric body speed, saturating at 5"),
        ];
        defs.extend(ObjectiveDef::numbered("action", self.num_actions));
        defs
    }
}

/// `then(slow, p_mean([sqrt(action), fast]))` over batch aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfCheetahComposer {
    pub num_actions: usize,
}

impl Composer for HalfCheetahComposer {
    fn name(&self) -> &str {
        "half_cheetah"
    }

    fn num_objectives(&self) -> usize {
        2 + self.num_actions
    }

    fn aggregate_names(&self) -> Vec<String> {
        vec!["action".into(), "slow".into(), "fast".into()]
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::BatchThenObjectives
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let over_batch = PowerMean::new(powers.p_batch).reduce(tape, batch, Some(0))?;
        let (Some(slow), Some(fast)) = (over_batch.get(0), over_batch.get(1)) else {
            return Err(CmorlError::ShapeError(format!(
                "half cheetah needs slow and fast speeds, got shape {:?}",
                batch.shape()
            )));
        };
        let actions = over_batch.slice(2..over_batch.len())?;
        let action = PowerMean::new(-1.0).reduce_all(tape, &actions);

        let smooth_action = tape.powf(action, 0.5);
        let speed_and_action =
            PowerMean::new(powers.p_objectives).reduce_vars(tape, &[smooth_action, fast]);
        let scalar = then(tape, slow, speed_and_action, 0.5, -1.0);

        Ok(Composition {
            per_objective: Tensor::vector(vec![action, slow, fast]),
            scalar,
        })
    }
}

pub fn cmorl(
    num_bodies: usize,
    num_actions: usize,
    speed_multiplier: f64,
) -> Result<Cmorl<LocomotionReward, LocomotionComposer>> {
    Cmorl::new(
        LocomotionReward::new(num_bodies, num_actions).with_speed_multiplier(speed_multiplier),
        LocomotionComposer {
            num_bodies,
            num_actions,
        },
    )
}

pub fn walker_cmorl(
    num_bodies: usize,
    num_actions: usize,
    speed_multiplier: f64,
) -> Result<Cmorl<LocomotionReward, WalkerComposer>> {
    Cmorl::new(
        LocomotionReward::new(num_bodies, num_actions).with_speed_multiplier(speed_multiplier),
        WalkerComposer {
            num_bodies,
            num_actions,
        },
    )
}

pub fn half_cheetah_cmorl() -> Result<Cmorl<HalfCheetahReward, HalfCheetahComposer>> {
    let reward = HalfCheetahReward::default();
    let num_actions = reward.num_actions;
    Cmorl::new(reward, HalfCheetahComposer { num_actions })
}

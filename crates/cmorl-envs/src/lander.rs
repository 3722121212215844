//! Lunar lander: approach the pad, touch down on both legs, save fuel

use cmorl_core::composer::{Composer, Composition, PowerParams, ReductionOrder};
use cmorl_core::shaping::{offset, offset_value};
use cmorl_core::{
    Cmorl, CmorlError, ObjectiveDef, ObjectiveVector, PowerMean, Result, RewardFunction, Tape,
    Tensor, Transition, Var, p_mean,
};
use serde::{Deserialize, Serialize};

/// `[nearness, very_nearness, fuel_lr, fuel_bottom, legs, landed]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanderReward;

impl RewardFunction for LanderReward {
    type Env = ();

    fn objectives(&self, transition: &Transition, _env: &mut ()) -> Result<ObjectiveVector> {
        let obs = &transition.next_state;
        if obs.len() < 4 {
            return Err(CmorlError::ShapeError(format!(
                "lander observation needs position and leg contacts, got {} entries",
                obs.len()
            )));
        }
        if transition.action.len() != 2 {
            return Err(CmorlError::DimensionMismatch {
                expected: 2,
                actual: transition.action.len(),
            });
        }

        let distance = obs[0].hypot(obs[1]);
        let legs_contact = &obs[obs.len() - 2..];
        let main_engine = transition.action[0];
        let side_engine = transition.action[1];

        let fuel_bottom = (1.0 - (main_engine + 1.0) / 2.0).clamp(0.0, 1.0);
        let fuel_lr = (1.0 - side_engine.abs()).clamp(0.0, 1.0);
        let nearness = 1.0 - distance.clamp(0.0, 1.0);
        let very_nearness = (1.0 - (2.0 * distance).clamp(0.0, 1.0)).powi(2);
        let legs = p_mean(legs_contact, 0.1);
        let fuel = p_mean(&[fuel_lr, fuel_bottom], 0.5);
        let landed = p_mean(&[legs, fuel, very_nearness], 0.0);

        Ok(ObjectiveVector::new(vec![
            nearness,
            very_nearness,
            fuel_lr,
            fuel_bottom,
            legs,
            landed,
        ]))
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        vec![
            ObjectiveDef::new("nearness").describe("1 at the pad, 0 at unit distance"),
            ObjectiveDef::new("very_nearness").describe("squared, 0 at half unit distance"),
            ObjectiveDef::new("fuel_lr").describe("side engine unused"),
            ObjectiveDef::new("fuel_bottom").describe("main engine unused"),
            ObjectiveDef::new("legs").describe("both legs in contact"),
            ObjectiveDef::new("landed").describe("legs down, engines off, on the pad"),
        ]
    }
}

/// Saturation level and headroom of one thresholded objective
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Value at which the objective counts as fully met
    pub full: f64,
    /// Headroom passed to `offset`
    pub slack: f64,
}

impl Threshold {
    const fn new(full: f64, slack: f64) -> Self {
        Self { full, slack }
    }

    fn apply(&self, tape: &Tape, x: Var) -> Var {
        let scaled = tape.clamp(tape.scale(x, 1.0 / self.full), 0.0, 1.0);
        if self.slack == 0.0 {
            scaled
        } else {
            offset(tape, scaled, self.slack)
        }
    }

    pub fn apply_value(&self, x: f64) -> f64 {
        offset_value((x / self.full).clamp(0.0, 1.0), self.slack)
    }
}

/// Thresholds for `[nearness, very_nearness, legs_touch, fuel, landed]`
pub const THRESHOLDS: [Threshold; 5] = [
    Threshold::new(0.8, 0.0),
    Threshold::new(0.6, 0.1),
    Threshold::new(0.6, 0.1),
    Threshold::new(0.7, 0.5),
    Threshold::new(0.7, 0.1),
];

/// Thresholds every objective, combines per sample, then over the batch
#[derive(Debug, Clone, Default)]
pub struct LanderComposer;

impl Composer for LanderComposer {
    fn name(&self) -> &str {
        "lunar_lander"
    }

    fn num_objectives(&self) -> usize {
        6
    }

    fn aggregate_names(&self) -> Vec<String> {
        ["nearness", "very_nearness", "legs_touch", "fuel_cost", "landed"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn reduction_order(&self) -> ReductionOrder {
        ReductionOrder::ObjectivesThenBatch
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let [nearness, very_nearness, legs_touch, fuel, landed] = THRESHOLDS;
        let fuel_cols = batch.columns(2..4)?;
        let fuel_mean = PowerMean::new(1.0).reduce(tape, &fuel_cols, Some(1))?;

        let clipped = Tensor::stack(&[
            batch.column(0)?.map(|v| nearness.apply(tape, v)),
            batch.column(1)?.map(|v| very_nearness.apply(tape, v)),
            batch.column(4)?.map(|v| legs_touch.apply(tape, v)),
            fuel_mean.map(|v| fuel.apply(tape, v)),
            batch.column(5)?.map(|v| landed.apply(tape, v)),
        ])?;

        let over_batch = PowerMean::new(powers.p_batch);
        let per_sample = PowerMean::new(powers.p_objectives).reduce(tape, &clipped, Some(0))?;
        Ok(Composition {
            per_objective: over_batch.reduce(tape, &clipped, Some(1))?,
            scalar: over_batch.reduce_all(tape, &per_sample),
        })
    }
}

pub fn cmorl() -> Result<Cmorl<LanderReward, LanderComposer>> {
    Cmorl::new(LanderReward, LanderComposer)
}

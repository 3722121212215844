//! Shaping operators
//!
//! Differentiable unary and binary operators used by composers. Several of
//! them register a backward rule that deliberately differs from the
//! derivative of their forward value:
//!
//! | operator | backward |
//! |---|---|
//! | [`clip_keep_in_range`] | `dy`, plus a constant push back into range when outside it |
//! | [`clip_preserve_grads`], [`offset`], [`importance`], [`soft`] | `dy` unchanged |
//! | [`scale_gradient`] | `k * dy` |
//! | [`move_towards_range`] | `-dy * (n - sign(n))` outside the range, `0` inside |
//!
//! Each operator also has a plain `f64` form (`*_value`) for reward functions.

use crate::pmean::PowerMean;
use crate::tape::{BackwardRule, ScaledGradient, Tape, Var};

/// Clamp into `[min, max]`; gradient passes through
pub fn clip_preserve_grads(tape: &Tape, x: Var, min: f64, max: f64) -> Var {
    let clipped = clamp_value(tape.value(x), min, max);
    tape.straight_through(clipped, x)
}

/// Clamp into `[min, max]`; outside the range the gradient gains a
/// constant `push` pointing back into it
pub fn clip_keep_in_range(tape: &Tape, x: Var, min: f64, max: f64, push: f64) -> Var {
    let clipped = clamp_value(tape.value(x), min, max);
    tape.custom(clipped, &[x], PushIntoRange { min, max, push })
}

#[derive(Debug, Clone, Copy)]
struct PushIntoRange {
    min: f64,
    max: f64,
    push: f64,
}

impl BackwardRule for PushIntoRange {
    fn name(&self) -> &'static str {
        "clip_keep_in_range"
    }

    fn backward(&self, upstream: f64, parents: &[f64], _output: f64) -> Vec<f64> {
        let x = parents[0];
        let g = if x > self.max {
            upstream + self.push
        } else if x < self.min {
            upstream - self.push
        } else {
            upstream
        };
        vec![g]
    }
}

/// Reserve headroom: `x * (1 - |slack|) + max(slack, 0)`
///
/// Positive slack lifts the floor, negative slack lowers the ceiling. The
/// gradient reaches `x` unscaled.
pub fn offset(tape: &Tape, x: Var, slack: f64) -> Var {
    tape.straight_through(offset_value(tape.value(x), slack), x)
}

pub fn offset_value(x: f64, slack: f64) -> f64 {
    x * (1.0 - slack.abs()) + slack.max(0.0)
}

/// "y only counts once x is adequate"
///
/// The mean of `x` and `offset(y, slack)` is rescaled so that the floor
/// (`x = 0`, `y = 0`) maps to 0 and `x = y = 1` maps to 1. `slack` is
/// expected in `[0, 1)`.
pub fn then(tape: &Tape, x: Var, y: Var, slack: f64, p: f64) -> Var {
    let mean = PowerMean::new(p);
    let floor = mean.of(&[0.0, slack]);
    let lifted_y = offset(tape, y, slack);
    let combined = mean.reduce_vars(tape, &[x, lifted_y]);
    let shifted = tape.add_scalar(combined, -floor);
    tape.scale(shifted, 1.0 / (1.0 - floor))
}

pub fn then_value(x: f64, y: f64, slack: f64, p: f64) -> f64 {
    let mean = PowerMean::new(p);
    let floor = mean.of(&[0.0, slack]);
    (mean.of(&[x, offset_value(y, slack)]) - floor) / (1.0 - floor)
}

/// Headroom reserved for stage `index` of a curriculum
fn stage_slack(slack: f64, index: usize) -> f64 {
    slack * (1.0 - 0.5f64.powi(index as i32))
}

/// N-ary [`then`]: earlier stages dominate later ones
///
/// Stage `i` is offset by `slack * (1 - 0.5^i)`, so the first stage gets no
/// headroom and each later stage's extra headroom halves.
pub fn curriculum(tape: &Tape, stages: &[Var], slack: f64, p: f64) -> Var {
    let slacks: Vec<f64> = (0..stages.len()).map(|i| stage_slack(slack, i)).collect();
    let mean = PowerMean::new(p);
    let floor = mean.of(&slacks);
    let lifted: Vec<Var> = stages
        .iter()
        .zip(&slacks)
        .map(|(v, s)| offset(tape, *v, *s))
        .collect();
    let combined = mean.reduce_vars(tape, &lifted);
    let shifted = tape.add_scalar(combined, -floor);
    tape.scale(shifted, 1.0 / (1.0 - floor))
}

pub fn curriculum_value(stages: &[f64], slack: f64, p: f64) -> f64 {
    let slacks: Vec<f64> = (0..stages.len()).map(|i| stage_slack(slack, i)).collect();
    let mean = PowerMean::new(p);
    let floor = mean.of(&slacks);
    let lifted: Vec<f64> = stages
        .iter()
        .zip(&slacks)
        .map(|(v, s)| offset_value(*v, *s))
        .collect();
    (mean.of(&lifted) - floor) / (1.0 - floor)
}

/// `x^p` forward; the gradient ignores `p`
pub fn importance(tape: &Tape, x: Var, p: f64) -> Var {
    tape.straight_through(tape.value(x).powf(p), x)
}

pub fn importance_value(x: f64, p: f64) -> f64 {
    x.powf(p)
}

/// `1 - (1 - x)^k`: flattens the approach to 1
pub fn weaken(tape: &Tape, x: Var, k: f64) -> Var {
    let gap = tape.rsub_scalar(1.0, x);
    let shrunk = tape.powf(gap, k);
    tape.rsub_scalar(1.0, shrunk)
}

pub fn weaken_value(x: f64, k: f64) -> f64 {
    1.0 - (1.0 - x).powf(k)
}

/// `x / (|x| + scale)` forward; gradient passes through
pub fn soft(tape: &Tape, x: Var, scale: f64) -> Var {
    tape.straight_through(soft_value(tape.value(x), scale), x)
}

pub fn soft_value(x: f64, scale: f64) -> f64 {
    x / (x.abs() + scale)
}

/// Map `[min, max]` linearly onto `[to_min, to_max]`, clamping outside
pub fn clip_to(tape: &Tape, x: Var, min: f64, max: f64, to_min: f64, to_max: f64) -> Var {
    let unit = tape.scale(tape.add_scalar(x, -min), 1.0 / (max - min));
    let clipped = tape.clamp(unit, 0.0, 1.0);
    tape.add_scalar(tape.scale(clipped, to_max - to_min), to_min)
}

pub fn clip_to_value(x: f64, min: f64, max: f64, to_min: f64, to_max: f64) -> f64 {
    clamp_value((x - min) / (max - min), 0.0, 1.0) * (to_max - to_min) + to_min
}

/// Identity forward, gradient multiplied by `k`
pub fn scale_gradient(tape: &Tape, x: Var, k: f64) -> Var {
    tape.custom(tape.value(x), &[x], ScaledGradient(k))
}

/// Range-proximity penalty
///
/// With `n` the position of `x` normalised so `[min, max]` maps to
/// `[-1, 1]`: forward is `1` inside the range and `1 / sqrt(|n|)` outside;
/// backward is `-dy * (n - sign(n))` outside and `0` inside.
pub fn move_towards_range(tape: &Tape, x: Var, min: f64, max: f64) -> Var {
    let value = move_towards_range_value(tape.value(x), min, max);
    tape.custom(value, &[x], RangeProximity { min, max })
}

pub fn move_towards_range_value(x: f64, min: f64, max: f64) -> f64 {
    let n = normalize_into_unit_range(x, min, max);
    if n.abs() <= 1.0 { 1.0 } else { 1.0 / n.abs().sqrt() }
}

#[derive(Debug, Clone, Copy)]
struct RangeProximity {
    min: f64,
    max: f64,
}

impl BackwardRule for RangeProximity {
    fn name(&self) -> &'static str {
        "move_towards_range"
    }

    fn backward(&self, upstream: f64, parents: &[f64], _output: f64) -> Vec<f64> {
        let n = normalize_into_unit_range(parents[0], self.min, self.max);
        let g = if n.abs() <= 1.0 {
            0.0
        } else {
            -upstream * (n - n.signum())
        };
        vec![g]
    }
}

fn normalize_into_unit_range(x: f64, min: f64, max: f64) -> f64 {
    2.0 * (x - min) / (max - min) - 1.0
}

/// `f64::clamp` without the panic on inverted bounds; NaN passes through
pub fn clamp_value(x: f64, min: f64, max: f64) -> f64 {
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grad_of(tape: &Tape, out: Var, x: Var) -> f64 {
        tape.gradient(out).wrt(x)
    }

    #[test]
    fn test_offset_zero_slack_is_identity() {
        for x in [0.0, 0.25, 0.5, 1.0, 3.0] {
            assert_eq!(offset_value(x, 0.0), x);
            let tape = Tape::new();
            let v = tape.leaf(x);
            assert_eq!(tape.value(offset(&tape, v, 0.0)), x);
        }
    }

    #[test]
    fn test_offset_reserves_headroom() {
        assert_eq!(offset_value(0.0, 0.2), 0.2);
        assert_eq!(offset_value(1.0, 0.2), 1.0);
        assert!((offset_value(1.0, -0.2) - 0.8).abs() < 1e-12);

        let tape = Tape::new();
        let x = tape.leaf(0.5);
        let y = offset(&tape, x, 0.5);
        assert_eq!(grad_of(&tape, y, x), 1.0);
    }

    #[test]
    fn test_then_orders_objectives() {
        let first = then_value(1.0, 0.0, 0.5, -1.0);
        let second = then_value(0.0, 1.0, 0.5, -1.0);
        assert!(first > second, "{} <= {}", first, second);

        let tape = Tape::new();
        let x = tape.leaf(1.0);
        let y = tape.leaf(0.0);
        assert!((tape.value(then(&tape, x, y, 0.5, -1.0)) - first).abs() < 1e-12);
    }

    #[test]
    fn test_then_spans_unit_interval() {
        assert!(then_value(0.0, 0.0, 0.5, -1.0).abs() < 1e-9);
        assert!((then_value(1.0, 1.0, 0.5, -1.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_curriculum_bounds_and_order() {
        assert!(curriculum_value(&[0.0, 0.0, 0.0], 0.3, -1.0).abs() < 1e-9);
        assert!((curriculum_value(&[1.0, 1.0, 1.0], 0.3, -1.0) - 1.0).abs() < 1e-9);

        let first_done = curriculum_value(&[1.0, 0.0, 0.0], 0.3, -1.0);
        let last_done = curriculum_value(&[0.0, 0.0, 1.0], 0.3, -1.0);
        assert!(first_done > last_done);

        let tape = Tape::new();
        let stages: Vec<Var> = [1.0, 0.0, 0.0].iter().map(|v| tape.leaf(*v)).collect();
        let c = curriculum(&tape, &stages, 0.3, -1.0);
        assert!((tape.value(c) - first_done).abs() < 1e-12);
    }

    #[test]
    fn test_clip_keep_in_range_pushes_back() {
        let tape = Tape::new();
        let above = tape.leaf(1.5);
        let below = tape.leaf(-2.0);
        let inside = tape.leaf(0.3);
        let a = clip_keep_in_range(&tape, above, -1.0, 1.0, 0.01);
        let b = clip_keep_in_range(&tape, below, -1.0, 1.0, 0.01);
        let c = clip_keep_in_range(&tape, inside, -1.0, 1.0, 0.01);

        assert_eq!(tape.value(a), 1.0);
        assert_eq!(tape.value(b), -1.0);
        assert_eq!(tape.value(c), 0.3);
        assert!((grad_of(&tape, a, above) - 1.01).abs() < 1e-12);
        assert!((grad_of(&tape, b, below) - 0.99).abs() < 1e-12);
        assert_eq!(grad_of(&tape, c, inside), 1.0);
    }

    #[test]
    fn test_clip_preserve_grads_passes_gradient() {
        let tape = Tape::new();
        let x = tape.leaf(4.0);
        let y = clip_preserve_grads(&tape, x, 0.0, 1.0);
        assert_eq!(tape.value(y), 1.0);
        assert_eq!(grad_of(&tape, y, x), 1.0);
    }

    #[test]
    fn test_importance_ignores_power_in_gradient() {
        let tape = Tape::new();
        let x = tape.leaf(0.5);
        let y = importance(&tape, x, 3.0);
        assert_eq!(tape.value(y), 0.125);
        assert_eq!(grad_of(&tape, y, x), 1.0);
    }

    #[test]
    fn test_weaken_has_natural_gradient() {
        let tape = Tape::new();
        let x = tape.leaf(0.5);
        let y = weaken(&tape, x, 2.0);
        assert!((tape.value(y) - 0.75).abs() < 1e-12);
        // d/dx (1 - (1-x)^2) = 2(1-x)
        assert!((grad_of(&tape, y, x) - 1.0).abs() < 1e-12);
        assert_eq!(weaken_value(1.0, 5.0), 1.0);
    }

    #[test]
    fn test_soft_saturates_with_passthrough_gradient() {
        assert_eq!(soft_value(1.0, 1.0), 0.5);
        assert!(soft_value(1e6, 1.0) < 1.0);
        assert!(soft_value(-3.0, 1.0) > -1.0);

        let tape = Tape::new();
        let x = tape.leaf(3.0);
        let y = soft(&tape, x, 1.0);
        assert_eq!(tape.value(y), 0.75);
        assert_eq!(grad_of(&tape, y, x), 1.0);
    }

    #[test]
    fn test_clip_to_maps_range() {
        assert_eq!(clip_to_value(0.5, 0.0, 1.0, 0.0, 2.0), 1.0);
        assert_eq!(clip_to_value(-3.0, 0.0, 1.0, 0.0, 1.0), 0.0);
        assert_eq!(clip_to_value(9.0, 0.0, 1.0, 0.2, 0.4), 0.4);

        let tape = Tape::new();
        let x = tape.leaf(0.25);
        let y = clip_to(&tape, x, 0.0, 0.5, 0.0, 1.0);
        assert_eq!(tape.value(y), 0.5);
        assert_eq!(grad_of(&tape, y, x), 2.0);
    }

    #[test]
    fn test_scale_gradient() {
        let tape = Tape::new();
        let x = tape.leaf(0.7);
        let y = scale_gradient(&tape, x, 0.1);
        assert_eq!(tape.value(y), 0.7);
        assert!((grad_of(&tape, y, x) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_move_towards_range() {
        assert_eq!(move_towards_range_value(0.5, 0.0, 1.0), 1.0);
        // x = 2 on [0, 1] normalises to n = 3
        assert!((move_towards_range_value(2.0, 0.0, 1.0) - 1.0 / 3f64.sqrt()).abs() < 1e-12);

        let tape = Tape::new();
        let inside = tape.leaf(0.5);
        let outside = tape.leaf(2.0);
        let a = move_towards_range(&tape, inside, 0.0, 1.0);
        let b = move_towards_range(&tape, outside, 0.0, 1.0);
        assert_eq!(grad_of(&tape, a, inside), 0.0);
        assert!((grad_of(&tape, b, outside) + 2.0).abs() < 1e-12);
    }
}

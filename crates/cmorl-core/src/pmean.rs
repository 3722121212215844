//! Generalized (power) mean engine
//!
//! `M_p(x) = (mean(x^p))^(1/p)` spans min (p → -inf), harmonic (p = -1),
//! geometric (p → 0), arithmetic (p = 1) and max (p → +inf).
//!
//! The reduction is evaluated as follows:
//! 1. `|p| < MIN_POWER` is pushed out to `±MIN_POWER`, keeping its sign. This
//!    approximates the geometric mean; it is not the exact log-mean limit.
//! 2. `slack` is added to every element so a single zero cannot collapse a
//!    negative-power mean to zero.
//! 3. Elements are divided by a stabilizer (the lane minimum for `p < 1`,
//!    the lane maximum otherwise) so `x^p` stays representable for large
//!    `|p|`, and the result is scaled back afterwards.
//! 4. Empty lanes yield the configured default.
//! 5. `slack` is subtracted again and the result is clamped into the
//!    `[min, max]` of the untouched lane. The clamp is straight-through: the
//!    gradient is that of the unclamped mean.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::tape::{Tape, Var};
use crate::tensor::Tensor;

/// Slack used unless a caller picks another one
pub const DEFAULT_SLACK: f64 = 1e-7;

/// Smallest `|p|` the engine evaluates
pub const MIN_POWER: f64 = 1e-4;

/// Move `p` away from zero, keeping its sign
pub fn guard_power(p: f64) -> f64 {
    if p.abs() < MIN_POWER {
        trace!(p, "power too close to zero, clamping");
        if p < 0.0 { -MIN_POWER } else { MIN_POWER }
    } else {
        p
    }
}

/// Parameters of one generalized-mean reduction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerMean {
    /// Power of the mean
    pub p: f64,
    /// Constant added before and removed after exponentiation
    #[serde(default = "default_slack")]
    pub slack: f64,
    /// Result for an empty lane
    #[serde(default)]
    pub default: f64,
}

fn default_slack() -> f64 {
    DEFAULT_SLACK
}

impl PowerMean {
    pub fn new(p: f64) -> Self {
        Self {
            p,
            slack: DEFAULT_SLACK,
            default: 0.0,
        }
    }

    pub fn with_slack(mut self, slack: f64) -> Self {
        self.slack = slack;
        self
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    /// Numeric reduction of a slice
    pub fn of(&self, values: &[f64]) -> f64 {
        self.lane(values).value
    }

    /// Differentiable reduction of one lane of variables
    pub fn reduce_vars(&self, tape: &Tape, vars: &[Var]) -> Var {
        let lane = self.lane(&tape.values(vars));
        if vars.is_empty() {
            return tape.leaf(lane.value);
        }
        let terms: Vec<(Var, f64)> = vars.iter().copied().zip(lane.partials).collect();
        tape.linear(lane.value, &terms)
    }

    /// Differentiable reduction of a whole tensor to a scalar
    pub fn reduce_all(&self, tape: &Tape, values: &Tensor) -> Var {
        self.reduce_vars(tape, values.vars())
    }

    /// Differentiable reduction along `axis` (`None` reduces everything)
    pub fn reduce(&self, tape: &Tape, values: &Tensor, axis: Option<usize>) -> Result<Tensor> {
        let (shape, lanes) = values.lanes(axis)?;
        let data = lanes
            .iter()
            .map(|lane| self.reduce_vars(tape, lane))
            .collect();
        Tensor::new(shape, data)
    }

    fn lane(&self, values: &[f64]) -> Lane {
        if values.is_empty() {
            return Lane {
                value: self.default,
                partials: Vec::new(),
            };
        }

        let p = guard_power(self.p);
        let n = values.len() as f64;
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let shifted: Vec<f64> = values.iter().map(|v| v + self.slack).collect();
        let stabilizer = stabilizer(&shifted, p);
        let ratios: Vec<f64> = shifted.iter().map(|v| v / stabilizer).collect();

        let mean_pow = ratios.iter().map(|r| r.powf(p)).sum::<f64>() / n;
        let m = mean_pow.powf(1.0 / p);
        let raw = m * stabilizer - self.slack;

        // NaN passes through so domain violations stay visible
        let value = if raw < lo {
            lo
        } else if raw > hi {
            hi
        } else {
            raw
        };

        // d/dx_i of the unclamped mean, in stabilized units: (r_i / m)^(p-1) / n
        let partials = ratios
            .iter()
            .map(|r| {
                let d = (r / m).powf(p - 1.0) / n;
                if d.is_finite() { d } else { 0.0 }
            })
            .collect();

        Lane { value, partials }
    }
}

struct Lane {
    value: f64,
    partials: Vec<f64>,
}

fn stabilizer(shifted: &[f64], p: f64) -> f64 {
    let min = shifted.iter().copied().fold(f64::INFINITY, f64::min);
    let max = shifted.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let usable = |s: f64| s > 0.0 && s.is_finite();
    if p < 1.0 && usable(min) {
        min
    } else if usable(max) {
        max
    } else {
        1.0
    }
}

/// Numeric generalized mean with default slack
pub fn p_mean(values: &[f64], p: f64) -> f64 {
    PowerMean::new(p).of(values)
}

/// Exact geometric mean `exp(mean(ln x))`; `0.0` for an empty slice
pub fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let log_mean = values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64;
    log_mean.exp()
}

/// `1 - M_p(1 - x)`: a mean that leans towards the largest element for `p < 1`
pub fn inv_mean(tape: &Tape, values: &Tensor, p: f64, axis: Option<usize>) -> Result<Tensor> {
    let complement = values.map(|v| tape.rsub_scalar(1.0, v));
    let reduced = PowerMean::new(p).reduce(tape, &complement, axis)?;
    Ok(reduced.map(|v| tape.rsub_scalar(1.0, v)))
}

/// Deform `M_p(x)` towards `min(x)`, the more so the further `x` is from 1
///
/// The deformation weight is `M_q(1 - x)`. Returns `None` for an empty lane.
pub fn p_to_min(tape: &Tape, vars: &[Var], p: f64, q: f64) -> Option<Var> {
    let min = tape.min(vars)?;
    let complement: Vec<Var> = vars.iter().map(|v| tape.rsub_scalar(1.0, *v)).collect();
    let deformator = PowerMean::new(q).reduce_vars(tape, &complement);
    let mean = PowerMean::new(p).reduce_vars(tape, vars);

    let weighted_mean = tape.mul(mean, deformator);
    let keep = tape.rsub_scalar(1.0, deformator);
    let weighted_min = tape.mul(keep, min);
    Some(tape.add(weighted_mean, weighted_min))
}

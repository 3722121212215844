//! Composers: batch of objective vectors to a scalar training signal
//!
//! A composer performs two generalized-mean reductions, one across
//! objectives (`p_objectives`) and one across the batch (`p_batch`). Nested
//! power means do not commute, so every composer declares its
//! [`ReductionOrder`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{CmorlError, Result};
use crate::pmean::PowerMean;
use crate::tape::{Tape, Var};
use crate::tensor::Tensor;

/// The two powers of a composition
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerParams {
    /// Power across the batch (or time) axis
    pub p_batch: f64,
    /// Power across objectives
    pub p_objectives: f64,
}

impl PowerParams {
    pub fn new(p_batch: f64, p_objectives: f64) -> Self {
        Self {
            p_batch,
            p_objectives,
        }
    }
}

impl Default for PowerParams {
    fn default() -> Self {
        Self::new(1.0, -1.0)
    }
}

/// Which axis a composer collapses first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionOrder {
    /// Combine objectives per sample, then average samples
    ObjectivesThenBatch,
    /// Average each objective over the batch, then combine objectives
    BatchThenObjectives,
}

impl std::fmt::Display for ReductionOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReductionOrder::ObjectivesThenBatch => write!(f, "objectives-then-batch"),
            ReductionOrder::BatchThenObjectives => write!(f, "batch-then-objectives"),
        }
    }
}

/// Output of [`Composer::compose`]
#[derive(Debug, Clone)]
pub struct Composition {
    /// Per-objective (or per-group) aggregate, for diagnostics
    pub per_objective: Tensor,
    /// Scalar training signal
    pub scalar: Var,
}

/// Reduces a `[batch, num_objectives]` tensor to a scalar
pub trait Composer: Send + Sync {
    /// Composer name
    fn name(&self) -> &str;

    /// Width of the objective vectors this composer consumes
    fn num_objectives(&self) -> usize;

    /// Names of the entries of [`Composition::per_objective`]
    fn aggregate_names(&self) -> Vec<String> {
        (0..self.num_objectives())
            .map(|i| format!("objective_{}", i))
            .collect()
    }

    /// Order in which the two reductions are applied
    fn reduction_order(&self) -> ReductionOrder;

    /// Value reported for an empty batch
    fn default_value(&self) -> f64 {
        0.0
    }

    /// Compose a non-empty batch recorded on `tape`
    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition>;
}

impl<C: Composer + ?Sized> Composer for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn num_objectives(&self) -> usize {
        (**self).num_objectives()
    }

    fn aggregate_names(&self) -> Vec<String> {
        (**self).aggregate_names()
    }

    fn reduction_order(&self) -> ReductionOrder {
        (**self).reduction_order()
    }

    fn default_value(&self) -> f64 {
        (**self).default_value()
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        (**self).compose(tape, batch, powers)
    }
}

/// Numeric result of a composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedQ {
    pub per_objective: Vec<f64>,
    pub scalar: f64,
}

/// Composition plus the gradient of the scalar with respect to every input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposedGradient {
    #[serde(flatten)]
    pub composed: ComposedQ,
    /// `[batch][objective]` gradient of the scalar
    pub gradient: Vec<Vec<f64>>,
}

/// Compose a batch of objective vectors
///
/// An empty batch yields the composer's default for every aggregate.
pub fn compose_batch<C, R>(composer: &C, batch: &[R], powers: PowerParams) -> Result<ComposedQ>
where
    C: Composer + ?Sized,
    R: AsRef<[f64]>,
{
    Ok(compose_with_gradient(composer, batch, powers)?.composed)
}

/// Compose a batch and differentiate the scalar
pub fn compose_with_gradient<C, R>(
    composer: &C,
    batch: &[R],
    powers: PowerParams,
) -> Result<ComposedGradient>
where
    C: Composer + ?Sized,
    R: AsRef<[f64]>,
{
    let names = composer.aggregate_names();
    if batch.is_empty() {
        debug!(composer = composer.name(), "empty batch, returning default");
        let default = composer.default_value();
        return Ok(ComposedGradient {
            composed: ComposedQ {
                per_objective: vec![default; names.len()],
                scalar: default,
            },
            gradient: Vec::new(),
        });
    }

    let width = composer.num_objectives();
    for row in batch {
        if let Some((index, value)) = row
            .as_ref()
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(CmorlError::DomainViolation {
                index,
                value: *value,
            });
        }
    }

    let tape = Tape::new();
    let input = Tensor::leaf_matrix(&tape, batch, width)?;
    let composition = composer.compose(&tape, &input, powers)?;

    if composition.per_objective.len() != names.len() {
        return Err(CmorlError::ShapeError(format!(
            "composer {} produced {} aggregates, declared {}",
            composer.name(),
            composition.per_objective.len(),
            names.len()
        )));
    }

    let grads = tape.gradient(composition.scalar);
    let gradient = input
        .vars()
        .chunks(width.max(1))
        .map(|row| grads.wrt_all(row))
        .collect();

    Ok(ComposedGradient {
        composed: ComposedQ {
            per_objective: composition.per_objective.values(&tape),
            scalar: tape.value(composition.scalar),
        },
        gradient,
    })
}

/// Plain two-stage generalized mean, used when an environment brings no
/// composer of its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PMeanComposer {
    pub num_objectives: usize,
    pub order: ReductionOrder,
    #[serde(default)]
    pub default: f64,
}

impl PMeanComposer {
    pub fn new(num_objectives: usize, order: ReductionOrder) -> Self {
        Self {
            num_objectives,
            order,
            default: 0.0,
        }
    }
}

impl Composer for PMeanComposer {
    fn name(&self) -> &str {
        "p_mean"
    }

    fn num_objectives(&self) -> usize {
        self.num_objectives
    }

    fn reduction_order(&self) -> ReductionOrder {
        self.order
    }

    fn default_value(&self) -> f64 {
        self.default
    }

    fn compose(&self, tape: &Tape, batch: &Tensor, powers: PowerParams) -> Result<Composition> {
        let over_batch = PowerMean::new(powers.p_batch).with_default(self.default);
        let over_objectives = PowerMean::new(powers.p_objectives).with_default(self.default);

        let per_objective = over_batch.reduce(tape, batch, Some(0))?;
        let scalar = match self.order {
            ReductionOrder::ObjectivesThenBatch => {
                let per_sample = over_objectives.reduce(tape, batch, Some(1))?;
                over_batch.reduce_all(tape, &per_sample)
            }
            ReductionOrder::BatchThenObjectives => over_objectives.reduce_all(tape, &per_objective),
        };

        Ok(Composition {
            per_objective,
            scalar,
        })
    }
}

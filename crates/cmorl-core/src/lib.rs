//! # cmorl-core
//!
//! Objective composition for multi-objective control policies.
//!
//! Reward functions map a transition to an [`ObjectiveVector`] of quality
//! signals in `[0, 1]`. A [`Composer`] then folds a batch of such vectors into
//! one scalar with nested generalized means:
//! - [`pmean`]: the generalized-mean engine
//! - [`shaping`]: operators with deliberately biased gradients
//! - [`tape`] and [`tensor`]: a small reverse-mode tape the operators record on
//! - [`values`]: discounted per-objective returns

pub mod cmorl;
pub mod composer;
pub mod error;
pub mod hyperparams;
pub mod objective;
pub mod pmean;
pub mod reward;
pub mod shaping;
pub mod tape;
pub mod tensor;
pub mod values;

pub use cmorl::Cmorl;
pub use composer::{
    ComposedGradient, ComposedQ, Composer, Composition, PMeanComposer, PowerParams,
    ReductionOrder, compose_batch, compose_with_gradient,
};
pub use error::{CmorlError, Result};
pub use hyperparams::{HyperParams, HyperParamsPatch};
pub use objective::{ObjectiveVector, Transition};
pub use pmean::{DEFAULT_SLACK, MIN_POWER, PowerMean, geometric_mean, inv_mean, p_mean, p_to_min};
pub use reward::{FnReward, ObjectiveDef, RewardFunction};
pub use tape::{BackwardRule, Gradients, Tape, Var};
pub use tensor::Tensor;
pub use values::{estimated_value, value_error, values};

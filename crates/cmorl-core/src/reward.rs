//! Reward functions: transition to objective vector

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

use crate::error::Result;
use crate::objective::{ObjectiveVector, Transition};

/// Definition of one objective dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveDef {
    /// Objective name
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Expected range
    #[serde(default = "default_range")]
    pub range: [f64; 2],
}

fn default_range() -> [f64; 2] {
    [0.0, 1.0]
}

impl ObjectiveDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            range: default_range(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `count` objectives named `prefix_0`, `prefix_1`, ...
    pub fn numbered(prefix: &str, count: usize) -> Vec<Self> {
        (0..count)
            .map(|i| Self::new(format!("{}_{}", prefix, i)))
            .collect()
    }
}

/// Trait for computing objective vectors from transitions
///
/// Any state a reward function needs beyond the transition (physical
/// positions, previous observations, limits) lives in `Env`, which the
/// caller owns and passes in on every call.
pub trait RewardFunction: Send + Sync {
    /// Caller-owned environment view
    type Env;

    /// Compute the objective vector for one transition
    fn objectives(&self, transition: &Transition, env: &mut Self::Env) -> Result<ObjectiveVector>;

    /// Objective dimensions produced, in order
    fn components(&self) -> Vec<ObjectiveDef>;
}

/// Reward function built from a closure
pub struct FnReward<F, E> {
    f: F,
    components: Vec<ObjectiveDef>,
    _env: PhantomData<fn(&mut E)>,
}

impl<F, E> FnReward<F, E>
where
    F: Fn(&Transition, &mut E) -> Result<ObjectiveVector> + Send + Sync,
{
    pub fn new(components: Vec<ObjectiveDef>, f: F) -> Self {
        Self {
            f,
            components,
            _env: PhantomData,
        }
    }
}

impl<F, E> RewardFunction for FnReward<F, E>
where
    F: Fn(&Transition, &mut E) -> Result<ObjectiveVector> + Send + Sync,
{
    type Env = E;

    fn objectives(&self, transition: &Transition, env: &mut E) -> Result<ObjectiveVector> {
        (self.f)(transition, env)
    }

    fn components(&self) -> Vec<ObjectiveDef> {
        self.components.clone()
    }
}

//! Training hyper-parameters
//!
//! Presets are built by layering [`HyperParamsPatch`]es over the defaults:
//! later layers override earlier ones field by field.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::composer::PowerParams;
use crate::error::{CmorlError, Result};

/// Full set of training hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    pub seed: Option<u64>,
    pub steps_per_epoch: usize,
    pub epochs: usize,
    pub replay_size: usize,
    pub gamma: f64,
    pub polyak: f64,
    pub pi_lr: f64,
    pub q_lr: f64,
    pub batch_size: usize,
    pub start_steps: usize,
    pub act_noise: f64,
    pub max_ep_len: Option<usize>,
    pub train_every: usize,
    pub train_steps: usize,
    pub p_batch: f64,
    pub p_objectives: f64,
    pub q_batch: f64,
    pub q_objectives: f64,
    pub qd_power: f64,
    pub threshold: f64,
    pub before_clip: f64,
    pub ignore_aps: bool,
    /// Extra keyword arguments for the environment constructor
    pub env_args: HashMap<String, serde_json::Value>,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            seed: None,
            steps_per_epoch: 2000,
            epochs: 100,
            replay_size: 100_000,
            gamma: 0.99,
            polyak: 0.99,
            pi_lr: 3e-3,
            q_lr: 3e-3,
            batch_size: 100,
            start_steps: 1000,
            act_noise: 0.05,
            max_ep_len: None,
            train_every: 50,
            train_steps: 50,
            p_batch: 1.0,
            p_objectives: -1.0,
            q_batch: 1.0,
            q_objectives: 1.0,
            qd_power: 1.0,
            threshold: 1.0,
            before_clip: 1e-2,
            ignore_aps: false,
            env_args: HashMap::new(),
        }
    }
}

const DESCRIPTIONS: &[(&str, &str)] = &[
    ("seed", "random seed; derived from the run when unset"),
    ("steps_per_epoch", "environment steps per epoch"),
    ("epochs", "number of epochs"),
    ("replay_size", "replay buffer capacity"),
    ("gamma", "discount factor"),
    ("polyak", "target network averaging coefficient"),
    ("pi_lr", "actor learning rate"),
    ("q_lr", "critic learning rate"),
    ("batch_size", "minibatch size"),
    ("start_steps", "steps of uniform random actions before using the policy"),
    ("act_noise", "exploration noise standard deviation"),
    ("max_ep_len", "episode length cap; environment default when unset"),
    ("train_every", "environment steps between training phases"),
    ("train_steps", "gradient steps per training phase"),
    ("p_batch", "power of the mean across the batch in the actor loss"),
    ("p_objectives", "power of the mean across objectives in the actor loss"),
    ("q_batch", "power of the mean across the batch in the critic loss"),
    ("q_objectives", "power of the mean across objectives in the critic loss"),
    ("qd_power", "weight of the td-inf loss"),
    ("threshold", "threshold for the loss that keeps actions in range"),
    ("before_clip", "loss weight for the clip loss"),
    (
        "ignore_aps",
        "ignore the objective composition and train on the original rewards",
    ),
    ("env_args", "extra environment constructor arguments"),
];

impl HyperParams {
    /// Defaults overridden by each patch in turn
    pub fn combine(patches: &[HyperParamsPatch]) -> Self {
        patches.iter().fold(Self::default(), |hp, patch| hp.merged(patch))
    }

    /// Apply one patch
    pub fn merged(mut self, patch: &HyperParamsPatch) -> Self {
        macro_rules! take {
            ($hp:expr, $patch:expr; $($field:ident),* $(,)?) => {
                $(if let Some(value) = &$patch.$field {
                    $hp.$field = value.clone();
                })*
            };
        }
        take!(
            self, patch;
            steps_per_epoch,
            epochs,
            replay_size,
            gamma,
            polyak,
            pi_lr,
            q_lr,
            batch_size,
            start_steps,
            act_noise,
            train_every,
            train_steps,
            p_batch,
            p_objectives,
            q_batch,
            q_objectives,
            qd_power,
            threshold,
            before_clip,
            ignore_aps,
            env_args,
        );
        if patch.seed.is_some() {
            self.seed = patch.seed;
        }
        if patch.max_ep_len.is_some() {
            self.max_ep_len = patch.max_ep_len;
        }
        self
    }

    /// Actor-loss powers
    pub fn powers(&self) -> PowerParams {
        PowerParams::new(self.p_batch, self.p_objectives)
    }

    /// Critic-loss powers
    pub fn q_powers(&self) -> PowerParams {
        PowerParams::new(self.q_batch, self.q_objectives)
    }

    /// `(name, description)` for every field
    pub fn descriptions() -> &'static [(&'static str, &'static str)] {
        DESCRIPTIONS
    }

    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(CmorlError::InvalidParameter(message()))
            }
        }

        check((0.0..=1.0).contains(&self.gamma), || {
            format!("gamma must be in [0, 1], got {}", self.gamma)
        })?;
        check((0.0..=1.0).contains(&self.polyak), || {
            format!("polyak must be in [0, 1], got {}", self.polyak)
        })?;
        for (name, lr) in [("pi_lr", self.pi_lr), ("q_lr", self.q_lr)] {
            check(lr.is_finite() && lr > 0.0, || {
                format!("{} must be positive, got {}", name, lr)
            })?;
        }
        for (name, p) in [
            ("p_batch", self.p_batch),
            ("p_objectives", self.p_objectives),
            ("q_batch", self.q_batch),
            ("q_objectives", self.q_objectives),
            ("qd_power", self.qd_power),
        ] {
            check(!p.is_nan(), || format!("{} must be a number", name))?;
        }
        check(self.batch_size > 0, || "batch_size must be positive".to_string())?;
        check(self.steps_per_epoch > 0, || {
            "steps_per_epoch must be positive".to_string()
        })?;
        check(self.replay_size >= self.batch_size, || {
            format!(
                "replay_size {} smaller than batch_size {}",
                self.replay_size, self.batch_size
            )
        })?;
        check(self.act_noise >= 0.0, || {
            format!("act_noise must be >= 0, got {}", self.act_noise)
        })?;
        check(self.before_clip >= 0.0, || {
            format!("before_clip must be >= 0, got {}", self.before_clip)
        })?;
        Ok(())
    }
}

/// Partial hyper-parameters; `None` keeps the underlying value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperParamsPatch {
    pub seed: Option<u64>,
    pub steps_per_epoch: Option<usize>,
    pub epochs: Option<usize>,
    pub replay_size: Option<usize>,
    pub gamma: Option<f64>,
    pub polyak: Option<f64>,
    pub pi_lr: Option<f64>,
    pub q_lr: Option<f64>,
    pub batch_size: Option<usize>,
    pub start_steps: Option<usize>,
    pub act_noise: Option<f64>,
    pub max_ep_len: Option<usize>,
    pub train_every: Option<usize>,
    pub train_steps: Option<usize>,
    pub p_batch: Option<f64>,
    pub p_objectives: Option<f64>,
    pub q_batch: Option<f64>,
    pub q_objectives: Option<f64>,
    pub qd_power: Option<f64>,
    pub threshold: Option<f64>,
    pub before_clip: Option<f64>,
    pub ignore_aps: Option<bool>,
    pub env_args: Option<HashMap<String, serde_json::Value>>,
}

impl HyperParamsPatch {
    /// Read a patch from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

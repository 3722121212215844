//! Environment registry and per-environment presets

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cmorl_core::{
    CmorlError, Composer, HyperParams, HyperParamsPatch, ObjectiveDef, Result, RewardFunction,
};
use serde::Serialize;
use tracing::debug;

use crate::{bittle, lander, locomotion, pendulum, reacher};

/// Everything needed to train or evaluate on one environment
#[derive(Clone)]
pub struct EnvConfig {
    /// Environment id, e.g. `Pendulum-v1`
    pub name: String,
    pub description: String,
    /// Objectives produced by the reward function, in order
    pub objectives: Vec<ObjectiveDef>,
    pub composer: Arc<dyn Composer>,
    /// Defaults with the environment's overrides applied
    pub hypers: HyperParams,
}

impl EnvConfig {
    pub fn new<R, C>(
        name: impl Into<String>,
        description: impl Into<String>,
        reward_fn: &R,
        composer: C,
        preset: HyperParamsPatch,
    ) -> Self
    where
        R: RewardFunction,
        C: Composer + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            objectives: reward_fn.components(),
            composer: Arc::new(composer),
            hypers: HyperParams::combine(&[preset]),
        }
    }

    pub fn summary(&self) -> EnvSummary {
        EnvSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            composer: self.composer.name().to_string(),
            reduction_order: self.composer.reduction_order().to_string(),
            objectives: self.objectives.iter().map(|o| o.name.clone()).collect(),
            aggregates: self.composer.aggregate_names(),
        }
    }
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("name", &self.name)
            .field("composer", &self.composer.name())
            .field("objectives", &self.objectives.len())
            .finish()
    }
}

/// Serializable listing of an [`EnvConfig`]
#[derive(Debug, Clone, Serialize)]
pub struct EnvSummary {
    pub name: String,
    pub description: String,
    pub composer: String,
    pub reduction_order: String,
    pub objectives: Vec<String>,
    pub aggregates: Vec<String>,
}

/// Registry of known environments, keyed by name
#[derive(Debug, Default)]
pub struct EnvRegistry {
    envs: BTreeMap<String, EnvConfig>,
}

impl EnvRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment, replacing any previous entry of the same name
    pub fn register(&mut self, config: EnvConfig) -> Result<()> {
        if config.objectives.len() != config.composer.num_objectives() {
            return Err(CmorlError::DimensionMismatch {
                expected: config.composer.num_objectives(),
                actual: config.objectives.len(),
            });
        }
        config.hypers.validate()?;
        debug!(env = %config.name, composer = config.composer.name(), "registered environment");
        self.envs.insert(config.name.clone(), config);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&EnvConfig> {
        self.envs
            .get(name)
            .ok_or_else(|| CmorlError::UnknownEnvironment(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.envs.contains_key(name)
    }

    /// All environments, sorted by name
    pub fn list(&self) -> Vec<&EnvConfig> {
        self.envs.values().collect()
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    /// The built-in environment catalogue
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for config in builtin_configs()? {
            registry.register(config)?;
        }
        Ok(registry)
    }
}

fn env_args(pairs: &[(&str, serde_json::Value)]) -> Option<HashMap<String, serde_json::Value>> {
    Some(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

fn builtin_configs() -> Result<Vec<EnvConfig>> {
    let pendulum = pendulum::cmorl(0.0)?;
    let reacher = reacher::cmorl(2)?;
    let hopper = locomotion::cmorl(4, 3, 0.5)?;
    let ant = locomotion::cmorl(13, 8, 0.5)?;
    let walker = locomotion::walker_cmorl(7, 6, 0.3)?;
    let cheetah = locomotion::half_cheetah_cmorl()?;
    let lander = lander::cmorl()?;
    let bittle = bittle::cmorl()?;

    Ok(vec![
        EnvConfig::new(
            "Pendulum-v1",
            "swing up and balance with little torque",
            pendulum.reward_fn(),
            pendulum.composer().clone(),
            HyperParamsPatch {
                epochs: Some(250),
                steps_per_epoch: Some(2000),
                pi_lr: Some(3e-3),
                q_lr: Some(3e-3),
                before_clip: Some(0.1),
                p_objectives: Some(0.0),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "Pendulum-custom",
            "pendulum with default hyper-parameters",
            pendulum.reward_fn(),
            pendulum.composer().clone(),
            HyperParamsPatch::default(),
        ),
        EnvConfig::new(
            "Reacher-v4",
            "reach the target with smooth actuation",
            reacher.reward_fn(),
            reacher.composer().clone(),
            HyperParamsPatch {
                steps_per_epoch: Some(2000),
                gamma: Some(0.9),
                polyak: Some(0.9),
                replay_size: Some(10_000),
                qd_power: Some(0.5),
                p_batch: Some(0.5),
                start_steps: Some(400),
                act_noise: Some(0.01),
                p_objectives: Some(-2.0),
                threshold: Some(2.0),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "Hopper-v4",
            "hop forward on one leg",
            hopper.reward_fn(),
            hopper.composer().clone(),
            HyperParamsPatch {
                epochs: Some(20),
                steps_per_epoch: Some(2000),
                p_objectives: Some(-1.0),
                act_noise: Some(0.07),
                threshold: Some(1.5),
                qd_power: Some(0.75),
                polyak: Some(0.9),
                start_steps: Some(2000),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "Ant-v4",
            "walk forward on four legs",
            ant.reward_fn(),
            ant.composer().clone(),
            HyperParamsPatch {
                epochs: Some(100),
                act_noise: Some(0.05),
                steps_per_epoch: Some(2000),
                env_args: env_args(&[("use_contact_forces", serde_json::json!(true))]),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "Walker2d-v4",
            "walk forward on two legs",
            walker.reward_fn(),
            walker.composer().clone(),
            HyperParamsPatch {
                epochs: Some(20),
                steps_per_epoch: Some(2000),
                p_objectives: Some(0.0),
                before_clip: Some(0.1),
                act_noise: Some(0.02),
                threshold: Some(0.2),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "HalfCheetah-v4",
            "run forward, slow gait first",
            cheetah.reward_fn(),
            cheetah.composer().clone(),
            HyperParamsPatch {
                epochs: Some(200),
                act_noise: Some(0.05),
                p_objectives: Some(-1.0),
                qd_power: Some(1.0),
                before_clip: Some(0.1),
                steps_per_epoch: Some(2000),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "LunarLanderContinuous-v2",
            "land on the pad on both legs with little fuel",
            lander.reward_fn(),
            lander.composer().clone(),
            HyperParamsPatch {
                epochs: Some(250),
                steps_per_epoch: Some(2000),
                p_objectives: Some(-1.0),
                act_noise: Some(0.05),
                p_batch: Some(1.0),
                start_steps: Some(2000),
                polyak: Some(0.9),
                qd_power: Some(0.5),
                threshold: Some(1.5),
                max_ep_len: Some(400),
                ..Default::default()
            },
        ),
        EnvConfig::new(
            "Bittle-custom",
            "quadruped robot walking forward",
            bittle.reward_fn(),
            bittle.composer().clone(),
            HyperParamsPatch {
                max_ep_len: Some(400),
                env_args: env_args(&[("observe_joints", serde_json::json!(true))]),
                ..Default::default()
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmorl_core::{ReductionOrder, compose_batch};

    #[test]
    fn test_builtin_catalogue() {
        let registry = EnvRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 9);
        for name in [
            "Pendulum-v1",
            "Reacher-v4",
            "Hopper-v4",
            "Ant-v4",
            "Walker2d-v4",
            "HalfCheetah-v4",
            "LunarLanderContinuous-v2",
            "Bittle-custom",
        ] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_presets_layer_over_defaults() {
        let registry = EnvRegistry::builtin().unwrap();

        let reacher = &registry.get("Reacher-v4").unwrap().hypers;
        assert_eq!(reacher.gamma, 0.9);
        assert_eq!(reacher.p_objectives, -2.0);
        assert_eq!(reacher.batch_size, 100);

        let ant = &registry.get("Ant-v4").unwrap().hypers;
        assert_eq!(ant.env_args["use_contact_forces"], serde_json::json!(true));

        let custom = &registry.get("Pendulum-custom").unwrap().hypers;
        assert_eq!(*custom, HyperParams::default());
    }

    #[test]
    fn test_unknown_environment() {
        let registry = EnvRegistry::builtin().unwrap();
        assert!(matches!(
            registry.get("CartPole-v1"),
            Err(CmorlError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_every_composer_accepts_its_width() {
        let registry = EnvRegistry::builtin().unwrap();
        for config in registry.list() {
            let width = config.objectives.len();
            let batch = vec![vec![0.5; width]; 4];
            let out = compose_batch(&config.composer, &batch, config.hypers.powers()).unwrap();
            assert!(out.scalar.is_finite(), "{}", config.name);
            assert!((0.0..=1.0).contains(&out.scalar), "{}: {}", config.name, out.scalar);
            assert_eq!(out.per_objective.len(), config.composer.aggregate_names().len());
        }
    }

    #[test]
    fn test_walker_is_batch_first() {
        let registry = EnvRegistry::builtin().unwrap();
        let walker = registry.get("Walker2d-v4").unwrap();
        assert_eq!(
            walker.composer.reduction_order(),
            ReductionOrder::BatchThenObjectives
        );
        let summary = walker.summary();
        assert_eq!(summary.aggregates, vec!["speed", "action"]);
        assert_eq!(summary.objectives.len(), 13);
    }

    #[test]
    fn test_register_rejects_width_mismatch() {
        let mut registry = EnvRegistry::new();
        let reward = crate::bittle::BittleReward::default();
        let config = EnvConfig::new(
            "broken",
            "",
            &reward,
            cmorl_core::PMeanComposer::new(2, ReductionOrder::ObjectivesThenBatch),
            HyperParamsPatch::default(),
        );
        assert!(registry.register(config).is_err());
        assert!(registry.is_empty());
    }
}

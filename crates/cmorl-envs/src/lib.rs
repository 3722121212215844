//! # cmorl-envs
//!
//! Reward functions and composers for the built-in environments.
//!
//! Each module exposes a reward function, its composer and a `cmorl`
//! constructor binding the two. Reward functions never keep hidden state:
//! anything carried between steps (previous body positions, physical limits)
//! lives in the caller-owned `Env` view passed to every call.

pub mod bittle;
pub mod lander;
pub mod locomotion;
pub mod pendulum;
pub mod reacher;
pub mod registry;
pub mod velocity;

pub use bittle::BittleReward;
pub use lander::{LanderComposer, LanderReward};
pub use locomotion::{
    HalfCheetahComposer, HalfCheetahReward, LocomotionComposer, LocomotionEnv, LocomotionReward,
    WalkerComposer,
};
pub use pendulum::{PendulumComposer, PendulumReward, PendulumState};
pub use reacher::{ReacherComposer, ReacherReward};
pub use registry::{EnvConfig, EnvRegistry, EnvSummary};
pub use velocity::VelocityEstimator;

//! # cmorl-eval
//!
//! Offline evaluation of recorded training runs.
//!
//! - [`episode`]: per-episode values, critic error and reward sums
//! - [`harness`]: run discovery, per-run composition and the parallel
//!   group evaluator

pub mod episode;
pub mod harness;

pub use episode::{EPISODES_FILE, EpisodeRecord, EpisodeReport, evaluate_episode, load_episodes};
pub use harness::{
    EvalConfig, EvaluationSummary, Evaluator, GroupReport, RunGroup, RunResult, Stat,
};

//! Recorded episodes and per-episode diagnostics

use cmorl_core::{CmorlError, ObjectiveVector, Result, estimated_value, value_error, values};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// File holding the episodes of one run
pub const EPISODES_FILE: &str = "episodes.json";

/// One evaluated episode as written by the rollout side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Objective vector of every step
    pub objectives: Vec<Vec<f64>>,
    /// Critic prediction for every step; empty when no critic was recorded
    #[serde(default)]
    pub critic: Vec<Vec<f64>>,
    /// Scalar environment reward of every step
    #[serde(default)]
    pub rewards: Vec<f64>,
    /// Terminated (as opposed to truncated)
    pub done: bool,
}

/// Diagnostics for one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub length: usize,
    pub reward_sum: f64,
    /// Undiscounted sum of every objective
    pub objective_sums: Vec<f64>,
    /// Discounted return of every step
    pub values: Vec<Vec<f64>>,
    /// Discounted return from the first step
    pub estimated_value: Vec<f64>,
    /// Mean absolute critic error per objective, if a critic was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_error: Option<Vec<f64>>,
}

/// Compute returns and critic error for one episode
pub fn evaluate_episode(record: &EpisodeRecord, gamma: f64) -> Result<EpisodeReport> {
    for row in &record.objectives {
        ObjectiveVector::new(row.clone()).check_domain()?;
    }
    let length = record.objectives.len();
    if !record.rewards.is_empty() && record.rewards.len() != length {
        return Err(CmorlError::ShapeError(format!(
            "{} rewards for {} steps",
            record.rewards.len(),
            length
        )));
    }

    let values = values(&record.objectives, gamma, record.done)?;
    let estimated_value = estimated_value(&record.objectives, gamma, record.done)?;
    let value_error = if record.critic.is_empty() {
        None
    } else {
        Some(value_error(&record.critic, &values)?)
    };

    let width = record.objectives.first().map(Vec::len).unwrap_or(0);
    let mut objective_sums = vec![0.0; width];
    for row in &record.objectives {
        for (sum, v) in objective_sums.iter_mut().zip(row) {
            *sum += v;
        }
    }

    debug!(length, done = record.done, "evaluated episode");
    Ok(EpisodeReport {
        length,
        reward_sum: record.rewards.iter().sum(),
        objective_sums,
        values,
        estimated_value,
        value_error,
    })
}

/// Read the episodes of one run directory
pub fn load_episodes(run_dir: &Path) -> Result<Vec<EpisodeRecord>> {
    let path = run_dir.join(EPISODES_FILE);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CmorlError::Io(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(done: bool) -> EpisodeRecord {
        EpisodeRecord {
            objectives: vec![vec![1.0, 0.0], vec![1.0, 1.0]],
            critic: vec![vec![1.5, 0.5], vec![1.0, 1.0]],
            rewards: vec![0.5, 2.0],
            done,
        }
    }

    #[test]
    fn test_terminated_episode() {
        let report = evaluate_episode(&record(true), 0.5).unwrap();
        assert_eq!(report.length, 2);
        assert_eq!(report.reward_sum, 2.5);
        assert_eq!(report.objective_sums, vec![2.0, 1.0]);
        assert_eq!(report.values, vec![vec![1.5, 0.5], vec![1.0, 1.0]]);
        assert_eq!(report.estimated_value, vec![1.5, 0.5]);
        assert_eq!(report.value_error, Some(vec![0.0, 0.0]));
    }

    #[test]
    fn test_truncated_episode_bootstraps() {
        let report = evaluate_episode(&record(false), 0.5).unwrap();
        assert_eq!(report.values[1], vec![2.0, 2.0]);
        assert_eq!(report.estimated_value, vec![2.0, 1.0]);
    }

    #[test]
    fn test_without_critic() {
        let mut r = record(true);
        r.critic.clear();
        let report = evaluate_episode(&r, 0.9).unwrap();
        assert!(report.value_error.is_none());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("value_error").is_none());
    }

    #[test]
    fn test_rejects_bad_records() {
        let mut negative = record(true);
        negative.objectives[0][1] = -0.5;
        assert!(matches!(
            evaluate_episode(&negative, 0.9),
            Err(CmorlError::DomainViolation { .. })
        ));

        let mut short_rewards = record(true);
        short_rewards.rewards.pop();
        assert!(evaluate_episode(&short_rewards, 0.9).is_err());

        let mut short_critic = record(true);
        short_critic.critic.pop();
        assert!(evaluate_episode(&short_critic, 0.9).is_err());
    }

    #[test]
    fn test_record_defaults_when_parsing() {
        let parsed: EpisodeRecord =
            serde_json::from_str(r#"{"objectives": [[0.5]], "done": true}"#).unwrap();
        assert!(parsed.critic.is_empty());
        assert!(parsed.rewards.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_episodes(dir.path()), Err(CmorlError::Io(_))));
    }
}

//! Run-group evaluation harness
//!
//! A run is a directory holding `episodes.json`; a group is a set of runs
//! trained the same way. Groups are evaluated in parallel on blocking
//! workers, and a failing group never takes its siblings down.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cmorl_core::{CmorlError, Composer, PowerParams, Result, compose_batch};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};

use crate::episode::{EPISODES_FILE, evaluate_episode, load_episodes};

/// Evaluation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Discount factor for the per-step values
    pub gamma: f64,
    /// Powers used to compose the values of a run
    pub powers: PowerParams,
    /// Groups evaluated at the same time
    pub max_workers: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            gamma: 0.99,
            powers: PowerParams::default(),
            max_workers: 10,
        }
    }
}

/// Mean and population standard deviation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub mean: f64,
    pub std: f64,
}

impl Stat {
    pub fn of(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

/// Composition of every value of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run: PathBuf,
    pub episodes: usize,
    /// Composed scalar
    pub q_c: f64,
    /// Composed aggregates
    pub qs_c: Vec<f64>,
    pub mean_reward_sum: f64,
}

/// Statistics across the runs of one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub runs: Vec<RunResult>,
    pub q_c: Stat,
    pub qs_c: Vec<Stat>,
    pub reward_sum: Stat,
}

/// Result of [`Evaluator::run_groups`], keyed by group name
///
/// A name seen more than once gets a `#2`, `#3`, ... suffix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub groups: BTreeMap<String, GroupReport>,
    /// Group name to failure reason
    pub failures: BTreeMap<String, String>,
}

/// Runs trained the same way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunGroup {
    pub name: String,
    pub runs: Vec<PathBuf>,
}

impl RunGroup {
    pub fn new(name: impl Into<String>, runs: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            runs,
        }
    }

    /// Collect the runs under `dir`, naming the group after `dir` as given
    ///
    /// A directory that itself holds `episodes.json` is a group of one run.
    /// Otherwise every immediate sub-directory holding the file is a run;
    /// the rest are skipped.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let name = dir.display().to_string();

        if dir.join(EPISODES_FILE).is_file() {
            return Ok(Self::new(name, vec![dir.to_path_buf()]));
        }

        let mut runs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() && path.join(EPISODES_FILE).is_file() {
                runs.push(path);
            } else {
                debug!(path = %path.display(), "skipping, not a run");
            }
        }
        runs.sort();
        Ok(Self::new(name, runs))
    }
}

/// Evaluates recorded runs with one composer
#[derive(Clone)]
pub struct Evaluator {
    composer: Arc<dyn Composer>,
    config: EvalConfig,
    completed: Arc<AtomicUsize>,
}

impl Evaluator {
    pub fn new(composer: Arc<dyn Composer>, config: EvalConfig) -> Result<Self> {
        if config.max_workers == 0 {
            return Err(CmorlError::InvalidParameter(
                "max_workers must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.gamma) {
            return Err(CmorlError::InvalidParameter(format!(
                "gamma must be in [0, 1], got {}",
                config.gamma
            )));
        }
        Ok(Self {
            composer,
            config,
            completed: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Groups finished by the current or last [`run_groups`](Self::run_groups)
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Evaluate every episode of a run and compose all their values at once
    pub fn evaluate_run(&self, run_dir: &Path) -> Result<RunResult> {
        let episodes = load_episodes(run_dir)?;
        if episodes.is_empty() {
            return Err(CmorlError::EvaluationFailed {
                task: run_dir.display().to_string(),
                reason: "no episodes".into(),
            });
        }

        let mut all_values = Vec::new();
        let mut reward_sums = Vec::with_capacity(episodes.len());
        for record in &episodes {
            let report = evaluate_episode(record, self.config.gamma)?;
            reward_sums.push(report.reward_sum);
            all_values.extend(report.values);
        }

        let composed = compose_batch(&self.composer, &all_values, self.config.powers)?;
        debug!(
            run = %run_dir.display(),
            episodes = episodes.len(),
            q_c = composed.scalar,
            "evaluated run"
        );
        Ok(RunResult {
            run: run_dir.to_path_buf(),
            episodes: episodes.len(),
            q_c: composed.scalar,
            qs_c: composed.per_objective,
            mean_reward_sum: Stat::of(&reward_sums).mean,
        })
    }

    /// Evaluate every run of a group and summarise across runs
    pub fn run_group(&self, group: &RunGroup) -> Result<GroupReport> {
        if group.runs.is_empty() {
            return Err(CmorlError::EvaluationFailed {
                task: group.name.clone(),
                reason: "no runs found".into(),
            });
        }
        info!(group = %group.name, runs = group.runs.len(), "evaluating group");

        let runs = group
            .runs
            .iter()
            .map(|dir| self.evaluate_run(dir))
            .collect::<Result<Vec<_>>>()?;

        let q_cs: Vec<f64> = runs.iter().map(|r| r.q_c).collect();
        let reward_sums: Vec<f64> = runs.iter().map(|r| r.mean_reward_sum).collect();
        let width = runs[0].qs_c.len();
        let qs_c = (0..width)
            .map(|i| Stat::of(&runs.iter().map(|r| r.qs_c[i]).collect::<Vec<_>>()))
            .collect();

        Ok(GroupReport {
            name: group.name.clone(),
            q_c: Stat::of(&q_cs),
            qs_c,
            reward_sum: Stat::of(&reward_sums),
            runs,
        })
    }

    /// Evaluate groups concurrently, at most `max_workers` at a time
    pub async fn run_groups(&self, groups: Vec<RunGroup>) -> EvaluationSummary {
        let total = groups.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let (tx, mut rx) = mpsc::channel(total.max(1));
        self.completed.store(0, Ordering::SeqCst);

        let mut seen: HashMap<String, usize> = HashMap::new();
        for group in groups {
            let count = seen.entry(group.name.clone()).or_insert(0);
            *count += 1;
            let name = if *count == 1 {
                group.name.clone()
            } else {
                warn!(group = %group.name, "duplicate group name");
                format!("{}#{}", group.name, count)
            };

            let evaluator = self.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(permit) => {
                        let worker = evaluator.clone();
                        let joined = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            worker.run_group(&group)
                        })
                        .await;
                        match joined {
                            Ok(Ok(report)) => Ok(report),
                            Ok(Err(e)) => Err(e.to_string()),
                            Err(e) => Err(format!("worker panicked: {}", e)),
                        }
                    }
                    Err(e) => Err(format!("worker pool closed: {}", e)),
                };

                let done = evaluator.completed.fetch_add(1, Ordering::SeqCst) + 1;
                info!(group = %name, done, total, "group finished");
                if tx.send((name, outcome)).await.is_err() {
                    error!("result channel closed before all groups reported");
                }
            });
        }
        drop(tx);

        let mut summary = EvaluationSummary::default();
        while let Some((name, outcome)) = rx.recv().await {
            match outcome {
                Ok(report) => {
                    summary.groups.insert(name, report);
                }
                Err(reason) => {
                    error!(group = %name, %reason, "group evaluation failed");
                    summary.failures.insert(name, reason);
                }
            }
        }
        summary
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("composer", &self.composer.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::EpisodeRecord;
    use cmorl_core::{PMeanComposer, ReductionOrder};
    use std::fs;

    fn write_run(dir: &Path, episodes: &[EpisodeRecord]) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(EPISODES_FILE),
            serde_json::to_string(episodes).unwrap(),
        )
        .unwrap();
    }

    fn episode(level: f64, reward: f64) -> EpisodeRecord {
        EpisodeRecord {
            objectives: vec![vec![level, level]],
            critic: Vec::new(),
            rewards: vec![reward],
            done: true,
        }
    }

    fn evaluator(max_workers: usize) -> Evaluator {
        let composer = Arc::new(PMeanComposer::new(2, ReductionOrder::ObjectivesThenBatch));
        Evaluator::new(
            composer,
            EvalConfig {
                gamma: 0.9,
                powers: PowerParams::new(1.0, 1.0),
                max_workers,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_stat() {
        let s = Stat::of(&[1.0, 3.0]);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.std, 1.0);
        assert!(Stat::of(&[]).mean.is_nan());
    }

    #[test]
    fn test_discover_skips_non_runs() {
        let root = tempfile::tempdir().unwrap();
        let group = root.path().join("pendulum_p-4");
        write_run(&group.join("seed_2"), &[episode(0.5, 1.0)]);
        write_run(&group.join("seed_1"), &[episode(0.5, 1.0)]);
        fs::create_dir_all(group.join("logs")).unwrap();
        fs::write(group.join("notes.txt"), "x").unwrap();

        let found = RunGroup::discover(&group).unwrap();
        assert_eq!(found.name, group.display().to_string());
        assert_eq!(found.runs.len(), 2);
        assert!(found.runs[0].ends_with("seed_1"));

        let single = RunGroup::discover(group.join("seed_1")).unwrap();
        assert_eq!(single.runs.len(), 1);
    }

    #[test]
    fn test_run_group_statistics() {
        let root = tempfile::tempdir().unwrap();
        write_run(&root.path().join("a"), &[episode(0.2, 1.0), episode(0.2, 3.0)]);
        write_run(&root.path().join("b"), &[episode(0.4, 5.0)]);

        let report = evaluator(1)
            .run_group(&RunGroup::discover(root.path()).unwrap())
            .unwrap();
        assert_eq!(report.runs.len(), 2);
        assert_eq!(report.runs[0].episodes, 2);
        assert!((report.q_c.mean - 0.3).abs() < 1e-6);
        assert!((report.q_c.std - 0.1).abs() < 1e-6);
        assert_eq!(report.qs_c.len(), 2);
        assert!((report.reward_sum.mean - 3.5).abs() < 1e-12);
        assert!((report.reward_sum.std - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_group_fails() {
        let root = tempfile::tempdir().unwrap();
        let err = evaluator(1)
            .run_group(&RunGroup::discover(root.path()).unwrap())
            .unwrap_err();
        assert!(matches!(err, CmorlError::EvaluationFailed { .. }));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let composer = Arc::new(PMeanComposer::new(2, ReductionOrder::ObjectivesThenBatch));
        let config = EvalConfig {
            max_workers: 0,
            ..EvalConfig::default()
        };
        assert!(Evaluator::new(composer, config).is_err());
    }

    #[tokio::test]
    async fn test_failing_group_does_not_abort_siblings() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("good");
        write_run(&good.join("run"), &[episode(0.5, 1.0)]);
        let bad = root.path().join("bad");
        fs::create_dir_all(bad.join("run")).unwrap();
        fs::write(bad.join("run").join(EPISODES_FILE), "not json").unwrap();
        let wide = root.path().join("wide");
        write_run(
            &wide.join("run"),
            &[EpisodeRecord {
                objectives: vec![vec![0.5, 0.5, 0.5]],
                critic: Vec::new(),
                rewards: Vec::new(),
                done: true,
            }],
        );

        let groups = vec![
            RunGroup::discover(&good).unwrap(),
            RunGroup::discover(&bad).unwrap(),
            RunGroup::discover(&wide).unwrap(),
        ];
        let eval = evaluator(2);
        let summary = eval.run_groups(groups).await;

        assert_eq!(eval.completed(), 3);
        assert!(summary.groups.contains_key(&good.display().to_string()));
        assert!(summary.failures.contains_key(&bad.display().to_string()));
        assert!(summary.failures[&wide.display().to_string()].contains("Dimension mismatch"));
    }

    #[tokio::test]
    async fn test_groups_sharing_a_basename_are_kept_apart() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join("a").join("pendulum");
        let second = root.path().join("b").join("pendulum");
        write_run(&first.join("run"), &[episode(0.2, 1.0)]);
        write_run(&second.join("run"), &[episode(0.8, 1.0)]);

        let groups = vec![
            RunGroup::discover(&first).unwrap(),
            RunGroup::discover(&second).unwrap(),
        ];
        let eval = evaluator(2);
        let summary = eval.run_groups(groups).await;

        assert_eq!(eval.completed(), 2);
        assert_eq!(summary.groups.len(), 2);
        let q_first = summary.groups[&first.display().to_string()].q_c.mean;
        let q_second = summary.groups[&second.display().to_string()].q_c.mean;
        assert!((q_first - 0.2).abs() < 1e-6);
        assert!((q_second - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_duplicate_group_names_get_suffixes() {
        let root = tempfile::tempdir().unwrap();
        let run = root.path().join("run");
        write_run(&run, &[episode(0.5, 1.0)]);

        let groups = vec![
            RunGroup::new("same", vec![run.clone()]),
            RunGroup::new("same", vec![run.clone()]),
            RunGroup::new("same", Vec::new()),
        ];
        let summary = evaluator(3).run_groups(groups).await;

        assert_eq!(summary.groups.len(), 2);
        assert!(summary.groups.contains_key("same"));
        assert!(summary.groups.contains_key("same#2"));
        assert!(summary.failures.contains_key("same#3"));
    }

    #[test]
    fn test_run_groups_from_sync_code() {
        let root = tempfile::tempdir().unwrap();
        for name in ["g1", "g2", "g3"] {
            write_run(&root.path().join(name).join("run"), &[episode(0.5, 2.0)]);
        }
        let groups = ["g1", "g2", "g3"]
            .iter()
            .map(|n| RunGroup::discover(root.path().join(n)).unwrap())
            .collect();

        let summary = tokio_test::block_on(evaluator(1).run_groups(groups));
        assert_eq!(summary.groups.len(), 3);
        assert!(summary.failures.is_empty());
    }
}

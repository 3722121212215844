//! CMORL command line
//!
//! - `envs`: list the built-in environments and their composers
//! - `compose`: compose a batch of objective vectors from a JSON file
//! - `values`: discounted per-objective returns of a recorded trajectory
//! - `evaluate`: evaluate groups of recorded runs in parallel

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use cmorl_core::{
    HyperParams, HyperParamsPatch, PowerParams, compose_batch, compose_with_gradient,
    estimated_value, values,
};
use cmorl_envs::{EnvConfig, EnvRegistry};
use cmorl_eval::{EvalConfig, Evaluator, RunGroup};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "cmorl", version, about = "Objective composition for multi-objective control")]
struct Cli {
    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List built-in environments
    Envs {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Compose a JSON batch (array of objective vectors)
    Compose {
        #[command(flatten)]
        env: EnvArgs,

        /// Batch file
        batch: PathBuf,

        /// Also print the gradient of the scalar for every input
        #[arg(long)]
        gradient: bool,
    },
    /// Discounted values of a JSON trajectory (array of objective vectors)
    Values {
        /// Trajectory file
        trajectory: PathBuf,

        #[arg(long, default_value_t = 0.99)]
        gamma: f64,

        /// The trajectory was cut off rather than terminated
        #[arg(long)]
        truncated: bool,
    },
    /// Evaluate run groups; each directory is one group
    Evaluate {
        #[command(flatten)]
        env: EnvArgs,

        /// Group directories
        #[arg(required = true)]
        groups: Vec<PathBuf>,

        /// Discount factor; the environment preset when omitted
        #[arg(long)]
        gamma: Option<f64>,

        /// Groups evaluated at the same time
        #[arg(long, default_value_t = 10)]
        workers: usize,
    },
}

/// Environment selection and power overrides shared by subcommands
#[derive(Args, Debug)]
struct EnvArgs {
    /// Environment name, see `cmorl envs`
    #[arg(long)]
    env: String,

    /// Hyper-parameter patch file layered over the environment preset
    #[arg(long)]
    hypers: Option<PathBuf>,

    #[arg(long, allow_hyphen_values = true)]
    p_batch: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    p_objectives: Option<f64>,
}

impl EnvArgs {
    /// Environment config and effective hyper-parameters
    fn resolve<'a>(&self, registry: &'a EnvRegistry) -> Result<(&'a EnvConfig, HyperParams)> {
        let config = registry.get(&self.env)?;
        let mut hypers = config.hypers.clone();
        if let Some(path) = &self.hypers {
            let patch = HyperParamsPatch::from_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
            hypers = hypers.merged(&patch);
        }
        hypers = hypers.merged(&HyperParamsPatch {
            p_batch: self.p_batch,
            p_objectives: self.p_objectives,
            ..Default::default()
        });
        hypers.validate()?;
        Ok((config, hypers))
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn read_matrix(path: &Path) -> Result<Vec<Vec<f64>>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn list_envs(registry: &EnvRegistry, json: bool) -> Result<()> {
    let summaries: Vec<_> = registry.list().into_iter().map(|c| c.summary()).collect();
    if json {
        return print_json(&summaries);
    }
    for s in summaries {
        println!(
            "{:<26} {:>3} objectives  {:<14} {:<22} {}",
            s.name,
            s.objectives.len(),
            s.composer,
            s.reduction_order,
            s.description
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ValuesOutput {
    estimated_value: Vec<f64>,
    values: Vec<Vec<f64>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let registry = EnvRegistry::builtin()?;

    match cli.command {
        Command::Envs { json } => list_envs(&registry, json)?,
        Command::Compose {
            env,
            batch,
            gradient,
        } => {
            let (config, hypers) = env.resolve(&registry)?;
            let rows = read_matrix(&batch)?;
            let powers: PowerParams = hypers.powers();
            info!(env = %config.name, rows = rows.len(), ?powers, "composing batch");
            if gradient {
                print_json(&compose_with_gradient(&config.composer, &rows, powers)?)?;
            } else {
                print_json(&compose_batch(&config.composer, &rows, powers)?)?;
            }
        }
        Command::Values {
            trajectory,
            gamma,
            truncated,
        } => {
            let rows = read_matrix(&trajectory)?;
            let done = !truncated;
            print_json(&ValuesOutput {
                estimated_value: estimated_value(&rows, gamma, done)?,
                values: values(&rows, gamma, done)?,
            })?;
        }
        Command::Evaluate {
            env,
            groups,
            gamma,
            workers,
        } => {
            let (config, hypers) = env.resolve(&registry)?;
            let groups = groups
                .iter()
                .map(RunGroup::discover)
                .collect::<cmorl_core::Result<Vec<_>>>()?;

            let evaluator = Evaluator::new(
                config.composer.clone(),
                EvalConfig {
                    gamma: gamma.unwrap_or(hypers.gamma),
                    powers: hypers.powers(),
                    max_workers: workers,
                },
            )?;
            info!(env = %config.name, groups = groups.len(), "evaluating");
            let summary = evaluator.run_groups(groups).await;
            print_json(&summary)?;

            if !summary.failures.is_empty() {
                warn!(failed = summary.failures.len(), "some groups failed");
                if summary.groups.is_empty() {
                    bail!("every group failed");
                }
            }
        }
    }

    Ok(())
}

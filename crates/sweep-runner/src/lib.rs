pub mod config;
pub mod engine;
pub mod error;
pub mod expand;
pub mod meta;
pub mod params;
pub mod resume;
pub mod run_id;
pub mod run_spec;
pub mod status;

pub use config::{load_config, resolve_experiment, SweepConfig, SweepOverrides};
pub use engine::{
    execute_runs, ExecutionOptions, NoopObserver, RunObserver, RunOutcome, RunRecord, SweepReport,
};
pub use error::{ConfigError, RunFault};
pub use expand::{expand_runs, Ablation, Expansion, REQUIRED_PARAMS};
pub use meta::RunMeta;
pub use params::{ParamMap, ParamValue};
pub use resume::{evaluate_resume, should_skip, ResumeDecision};
pub use run_id::{sanitize_token, stable_run_id};
pub use run_spec::{build_run_spec, make_run_specs, RunSpec};
pub use status::{run_status, sweep_status, RunStatus};

use anyhow::Result;
use std::path::{Path, PathBuf};
use sweep_core::ensure_dir;
use tracing::{debug, info};

/// The complete, validated run set of one experiment.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub exp_name: String,
    pub exp_dir: PathBuf,
    pub jobs: usize,
    pub specs: Vec<RunSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct ResumePartition {
    pub to_run: Vec<RunSpec>,
    pub skipped: Vec<RunSpec>,
}

/// Resolves the experiment and builds every RunSpec. Pure with respect to
/// the filesystem: nothing is created, so a configuration error leaves no
/// trace on disk.
pub fn plan_sweep(
    config: &SweepConfig,
    root: &Path,
    overrides: &SweepOverrides,
) -> Result<SweepPlan, ConfigError> {
    let resolved = resolve_experiment(config, root, overrides)?;
    let specs = make_run_specs(config, &resolved.exp_dir)?;
    Ok(SweepPlan {
        exp_name: resolved.exp_name,
        exp_dir: resolved.exp_dir,
        jobs: resolved.jobs,
        specs,
    })
}

impl SweepPlan {
    pub fn partition(&self, resume: bool) -> ResumePartition {
        let mut out = ResumePartition::default();
        for spec in &self.specs {
            let decision = evaluate_resume(spec, resume);
            if decision.can_skip() {
                info!(run_id = %spec.run_id, "skipping: {}", decision.reason());
                out.skipped.push(spec.clone());
            } else {
                if resume {
                    debug!(run_id = %spec.run_id, "re-running: {}", decision.reason());
                }
                out.to_run.push(spec.clone());
            }
        }
        out
    }

    pub fn runs_dir(&self) -> PathBuf {
        run_spec::runs_dir(&self.exp_dir)
    }

    /// Creates the experiment directories and executes `to_run`.
    pub fn execute(
        &self,
        to_run: &[RunSpec],
        fail_fast: bool,
        cwd: &Path,
        observer: &dyn RunObserver,
    ) -> Result<SweepReport> {
        ensure_dir(&self.runs_dir())?;
        let opts = ExecutionOptions {
            jobs: self.jobs,
            fail_fast,
            cwd: cwd.to_path_buf(),
        };
        execute_runs(to_run, &opts, observer)
    }
}

pub fn format_cmd(cmd: &[String]) -> String {
    cmd.iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> SweepConfig {
        SweepConfig::from_value(json!({
            "name": "smoke",
            "common_args": {
                "policy": "full", "pdfs": 1, "iters": 1, "subqueries": 1,
                "time_scale": 1.0, "heavy_tail_prob": 0.0, "heavy_tail_mult": 1.0
            },
            "matrix": {"workflows": [10, 50], "seeds": [1, 2]}
        }))
        .expect("config")
    }

    #[test]
    fn format_cmd_quotes_only_when_needed() {
        let cmd = vec![
            "./build/agent_sched_sim".to_string(),
            "--policy".to_string(),
            "dag cheapest".to_string(),
            "--out_dir".to_string(),
            "/tmp/it's".to_string(),
            String::new(),
        ];
        assert_eq!(
            format_cmd(&cmd),
            r#"./build/agent_sched_sim --policy 'dag cheapest' --out_dir '/tmp/it'"'"'s' ''"#
        );
    }

    #[test]
    fn plan_lays_out_runs_under_experiment_dir() {
        let dir = tempfile::tempdir().expect("tmp");
        let plan = plan_sweep(&config(), dir.path(), &SweepOverrides::default()).expect("plan");
        assert_eq!(plan.exp_dir, dir.path().join("bench_runs").join("smoke"));
        assert_eq!(plan.specs.len(), 4);
        for spec in &plan.specs {
            assert_eq!(spec.run_dir.parent(), Some(plan.runs_dir().as_path()));
        }
        assert!(!plan.exp_dir.exists(), "planning must not touch the filesystem");
    }

    #[test]
    fn empty_workflows_fails_before_any_directory_exists() {
        let dir = tempfile::tempdir().expect("tmp");
        let mut cfg = config();
        cfg.matrix.insert("workflows".to_string(), json!([]));
        let err = plan_sweep(&cfg, dir.path(), &SweepOverrides::default()).expect_err("must fail");
        assert_eq!(err, ConfigError::EmptyMatrixList("workflows".into()));
        assert!(!dir.path().join("bench_runs").exists());
    }

    #[test]
    fn partition_without_resume_runs_everything() {
        let dir = tempfile::tempdir().expect("tmp");
        let plan = plan_sweep(&config(), dir.path(), &SweepOverrides::default()).expect("plan");
        let part = plan.partition(false);
        assert_eq!(part.to_run.len(), 4);
        assert!(part.skipped.is_empty());
    }
}

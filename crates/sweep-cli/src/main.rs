use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use sweep_runner::config::{resolve_against, DEFAULT_CONFIG_PATH};
use sweep_runner::{
    format_cmd, load_config, plan_sweep, sweep_status, ConfigError, RunObserver, RunOutcome,
    RunRecord, RunSpec, SweepOverrides, SweepPlan, SweepReport,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Failure lines printed at the end of a run before truncating.
const MAX_LISTED_FAILURES: usize = 50;

const EXIT_RUN_FAILED: i32 = 1;
const EXIT_SETUP_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "sweep", version, about = "Benchmark sweep orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct TargetArgs {
    /// Experiment config (JSON or YAML). Relative paths resolve against --root.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Experiment name override (defaults to config.name).
    #[arg(long, alias = "exp_name")]
    exp_name: Option<String>,
    /// Output root override (defaults to config.out_root).
    #[arg(long, alias = "out_root")]
    out_root: Option<PathBuf>,
    /// Max concurrent runs (defaults to config.jobs or 1).
    #[arg(long)]
    jobs: Option<i64>,
    /// Working root for relative paths and for every launched process.
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand the matrix and execute every run.
    Run {
        #[command(flatten)]
        target: TargetArgs,
        /// Print planned runs only.
        #[arg(long, alias = "dry_run")]
        dry_run: bool,
        /// Skip runs already completed with matching meta.json.
        #[arg(long)]
        resume: bool,
        /// Stop starting new runs after the first failure.
        #[arg(long, alias = "fail_fast")]
        fail_fast: bool,
        #[arg(long)]
        json: bool,
    },
    /// Report the on-disk state of every planned run.
    Status {
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let code = match run_command(cli.command) {
        Ok((payload, code)) => {
            if let Some(payload) = payload {
                emit_json(&payload);
            }
            code
        }
        Err(err) => {
            let code = if err.downcast_ref::<ConfigError>().is_some() {
                "config_error"
            } else {
                "command_failed"
            };
            if json_mode {
                emit_json(&json_error(code, format!("{:#}", err), json!({})));
            } else {
                eprintln!("error: {:#}", err);
            }
            EXIT_SETUP_FAILED
        }
    };
    std::process::exit(code);
}

fn run_command(command: Commands) -> Result<(Option<Value>, i32)> {
    match command {
        Commands::Run {
            target,
            dry_run,
            resume,
            fail_fast,
            json,
        } => {
            let (plan, root) = load_plan(&target)?;
            let part = plan.partition(resume);
            if !json {
                println!("experiment: {}", plan.exp_dir.display());
                println!(
                    "planned_runs={} to_run={} skipped={} jobs={}",
                    plan.specs.len(),
                    part.to_run.len(),
                    part.skipped.len(),
                    plan.jobs
                );
            }
            if dry_run {
                if json {
                    return Ok((
                        Some(json!({
                            "ok": true,
                            "command": "run",
                            "dry_run": true,
                            "summary": plan_to_json(&plan, part.to_run.len(), part.skipped.len()),
                            "runs": part.to_run.iter().map(spec_to_json).collect::<Vec<_>>(),
                        })),
                        0,
                    ));
                }
                // A closed pipe (e.g. `| head`) just ends the listing.
                let _ = print_dry_run(&part.to_run);
                return Ok((None, 0));
            }

            info!(
                exp_dir = %plan.exp_dir.display(),
                to_run = part.to_run.len(),
                skipped = part.skipped.len(),
                "starting sweep"
            );
            let observer = CliObserver { quiet: json };
            let report = plan.execute(&part.to_run, fail_fast, &root, &observer)?;
            let code = if report.is_success() { 0 } else { EXIT_RUN_FAILED };
            if json {
                return Ok((
                    Some(json!({
                        "ok": report.is_success(),
                        "command": "run",
                        "dry_run": false,
                        "summary": plan_to_json(&plan, part.to_run.len(), part.skipped.len()),
                        "report": report_to_json(&report),
                    })),
                    code,
                ));
            }
            print_failures(&report);
            Ok((None, code))
        }
        Commands::Status { target, json } => {
            let (plan, _) = load_plan(&target)?;
            let (rows, counts) = sweep_status(&plan.specs);
            if json {
                return Ok((
                    Some(json!({
                        "ok": true,
                        "command": "status",
                        "experiment": plan.exp_dir.display().to_string(),
                        "counts": counts,
                        "runs": rows
                            .iter()
                            .map(|(id, status)| json!({"run_id": id, "status": status.as_str()}))
                            .collect::<Vec<_>>(),
                    })),
                    0,
                ));
            }
            println!("experiment: {}", plan.exp_dir.display());
            for (run_id, status) in &rows {
                println!("{:<12} {}", status.as_str(), run_id);
            }
            let totals: Vec<String> = counts.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            println!("{}", totals.join(" "));
            Ok((None, 0))
        }
    }
}

fn load_plan(target: &TargetArgs) -> Result<(SweepPlan, PathBuf)> {
    let root = match &target.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let root = root
        .canonicalize()
        .with_context(|| format!("invalid --root {}", root.display()))?;
    let config_path = resolve_against(&root, &target.config);
    let config = load_config(&config_path)?;
    let overrides = SweepOverrides {
        exp_name: target.exp_name.clone(),
        out_root: target.out_root.clone(),
        jobs: target.jobs,
    };
    let plan = plan_sweep(&config, &root, &overrides)?;
    Ok((plan, root))
}

struct CliObserver {
    quiet: bool,
}

impl RunObserver for CliObserver {
    fn on_finish(&self, record: &RunRecord, done: usize, total: usize) {
        if self.quiet {
            return;
        }
        match &record.outcome {
            RunOutcome::Exited { code: 0 } => {
                println!("[OK]   {} ({}/{})", record.run_id, done, total);
            }
            RunOutcome::Exited { code } => {
                eprintln!(
                    "[FAIL] {} exit_code={} ({}/{})",
                    record.run_id, code, done, total
                );
            }
            RunOutcome::Fault { fault } => {
                eprintln!("[FAIL] {}: fault: {} ({}/{})", record.run_id, fault, done, total);
            }
        }
    }
}

fn print_dry_run(specs: &[RunSpec]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for spec in specs {
        writeln!(out, "- {}", spec.run_id)?;
        writeln!(out, "  run_dir={}", spec.run_dir.display())?;
        writeln!(out, "  cmd={}", format_cmd(&spec.cmd))?;
    }
    out.flush()
}

fn print_failures(report: &SweepReport) {
    if report.cancelled > 0 {
        eprintln!("cancelled={}", report.cancelled);
    }
    if report.failures.is_empty() {
        return;
    }
    eprintln!("failures={}", report.failures.len());
    for (run_id, code) in report.failures.iter().take(MAX_LISTED_FAILURES) {
        eprintln!("- {}: exit_code={}", run_id, code);
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Status { json, .. } => *json,
    }
}

fn plan_to_json(plan: &SweepPlan, to_run: usize, skipped: usize) -> Value {
    json!({
        "experiment": plan.exp_name,
        "exp_dir": plan.exp_dir.display().to_string(),
        "planned_runs": plan.specs.len(),
        "to_run": to_run,
        "skipped": skipped,
        "jobs": plan.jobs,
    })
}

fn spec_to_json(spec: &RunSpec) -> Value {
    json!({
        "run_id": spec.run_id,
        "run_dir": spec.run_dir.display().to_string(),
        "cmd": spec.cmd,
    })
}

fn report_to_json(report: &SweepReport) -> Value {
    json!({
        "completed": report
            .completed
            .iter()
            .map(|r| json!({
                "run_id": r.run_id,
                "exit_code": r.outcome.exit_code(),
                "wall_time_s": r.wall_time_s,
            }))
            .collect::<Vec<_>>(),
        "failures": report
            .failures
            .iter()
            .map(|(id, code)| json!({"run_id": id, "exit_code": code}))
            .collect::<Vec<_>>(),
        "cancelled": report.cancelled,
        "wall_time_s": report.wall_time_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_underscore_aliases() {
        let cli = Cli::try_parse_from([
            "sweep", "run", "--config", "c.json", "--exp_name", "x", "--dry_run", "--fail_fast",
            "--jobs", "4",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                target,
                dry_run,
                fail_fast,
                resume,
                ..
            } => {
                assert_eq!(target.exp_name.as_deref(), Some("x"));
                assert_eq!(target.jobs, Some(4));
                assert!(dry_run && fail_fast && !resume);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn config_defaults_to_bench_experiments() {
        let cli = Cli::try_parse_from(["sweep", "status"]).expect("parse");
        match cli.command {
            Commands::Status { target, json } => {
                assert_eq!(target.config, PathBuf::from(DEFAULT_CONFIG_PATH));
                assert!(!json);
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn json_error_envelope() {
        let v = json_error("config_error", "bad".into(), json!({}));
        assert_eq!(v["ok"], json!(false));
        assert_eq!(v["error"]["code"], json!("config_error"));
    }
}

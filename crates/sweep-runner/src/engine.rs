use crate::error::RunFault;
use crate::meta::{write_meta, MetaGuard, RunMeta, FAULT_EXIT_CODE};
use crate::run_spec::RunSpec;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Upper bound on concurrently running processes.
    pub jobs: usize,
    /// Stop handing out new runs after the first failure.
    pub fail_fast: bool,
    /// Working directory of every launched process.
    pub cwd: PathBuf,
}

#[derive(Debug)]
pub enum RunOutcome {
    Exited { code: i32 },
    Fault { fault: RunFault },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Fault { .. } => FAULT_EXIT_CODE,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == 0
    }
}

#[derive(Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub wall_time_s: f64,
}

/// Result of one batch. `completed` is in completion order.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub completed: Vec<RunRecord>,
    pub failures: Vec<(String, i32)>,
    pub cancelled: usize,
    pub wall_time_s: f64,
}

impl SweepReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Progress callbacks. Called from worker threads (`on_start`) and from the
/// collecting thread (`on_finish`).
pub trait RunObserver: Sync {
    fn on_start(&self, _spec: &RunSpec) {}
    fn on_finish(&self, _record: &RunRecord, _done: usize, _total: usize) {}
}

pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Runs every spec at most once on a pool of `opts.jobs` workers.
///
/// Workers claim specs in submission order and check the cancel flag before
/// each claim; with `fail_fast` the first failure raises that flag, so runs
/// not yet claimed are never launched while runs in flight finish and are
/// still reported.
pub fn execute_runs(
    specs: &[RunSpec],
    opts: &ExecutionOptions,
    observer: &dyn RunObserver,
) -> Result<SweepReport> {
    if opts.jobs == 0 {
        return Err(anyhow!("jobs must be > 0"));
    }
    let started = Instant::now();
    let total = specs.len();
    let mut report = SweepReport::default();
    if total == 0 {
        return Ok(report);
    }

    let next = AtomicUsize::new(0);
    let launched = AtomicUsize::new(0);
    let cancel = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel::<RunRecord>();
    let workers = opts.jobs.min(total);

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (next, launched, cancel) = (&next, &launched, &cancel);
            scope.spawn(move || loop {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= total || cancel.load(Ordering::SeqCst) {
                    break;
                }
                launched.fetch_add(1, Ordering::SeqCst);
                let spec = &specs[idx];
                observer.on_start(spec);
                let record = run_one(spec, opts);
                if opts.fail_fast && !record.outcome.succeeded() {
                    cancel.store(true, Ordering::SeqCst);
                }
                if tx.send(record).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for record in rx {
            let code = record.outcome.exit_code();
            match &record.outcome {
                RunOutcome::Exited { code: 0 } => {}
                RunOutcome::Exited { code } => {
                    warn!(run_id = %record.run_id, exit_code = code, "run failed");
                }
                RunOutcome::Fault { fault } => {
                    error!(run_id = %record.run_id, "run fault: {}", fault);
                }
            }
            if code != 0 {
                report.failures.push((record.run_id.clone(), code));
                if opts.fail_fast && report.failures.len() == 1 {
                    cancel.store(true, Ordering::SeqCst);
                    warn!(run_id = %record.run_id, "fail-fast: cancelling runs not yet started");
                }
            }
            observer.on_finish(&record, report.completed.len() + 1, total);
            report.completed.push(record);
        }
    });

    report.cancelled = total - launched.load(Ordering::SeqCst);
    report.wall_time_s = started.elapsed().as_secs_f64();
    Ok(report)
}

/// Executes one run: phase-1 record, process, phase-2 record. Never panics
/// across the pool boundary; every failure becomes a `RunOutcome`.
pub fn run_one(spec: &RunSpec, opts: &ExecutionOptions) -> RunRecord {
    let started = Instant::now();
    info!(run_id = %spec.run_id, "starting run");
    let outcome = match execute(spec, opts) {
        Ok(code) => RunOutcome::Exited { code },
        Err(fault) => RunOutcome::Fault { fault },
    };
    let wall_time_s = started.elapsed().as_secs_f64();
    if outcome.succeeded() {
        info!(run_id = %spec.run_id, wall_time_s, "run finished");
    }
    RunRecord {
        run_id: spec.run_id.clone(),
        outcome,
        wall_time_s,
    }
}

fn execute(spec: &RunSpec, opts: &ExecutionOptions) -> Result<i32, RunFault> {
    for dir in [&spec.run_dir, &spec.out_dir] {
        fs::create_dir_all(dir).map_err(|source| RunFault::CreateDirs {
            path: dir.clone(),
            source,
        })?;
    }

    let meta_path = spec.meta_path();
    let meta = RunMeta::started(spec, &opts.cwd);
    write_meta(&meta_path, &meta).map_err(|e| RunFault::WriteMeta {
        path: meta_path.clone(),
        message: format!("{:#}", e),
    })?;
    let mut guard = MetaGuard::new(&meta_path, meta);

    let (code, fault) = match launch(spec, opts) {
        Ok(code) => (code, None),
        Err(fault) => (FAULT_EXIT_CODE, Some(fault)),
    };
    let finalized = guard.finish(code, fault.as_ref().map(|f| f.to_string()));
    if let Some(fault) = fault {
        if let Err(e) = finalized {
            error!(run_id = %spec.run_id, "failed to finalize meta.json: {:#}", e);
        }
        return Err(fault);
    }
    finalized.map_err(|e| RunFault::WriteMeta {
        path: meta_path,
        message: format!("{:#}", e),
    })?;
    Ok(code)
}

fn launch(spec: &RunSpec, opts: &ExecutionOptions) -> Result<i32, RunFault> {
    let (program, args) = spec.cmd.split_first().ok_or(RunFault::EmptyCommand)?;
    let open_log = |path: PathBuf| {
        fs::File::create(&path).map_err(|source| RunFault::OpenLog { path, source })
    };
    let stdout = open_log(spec.stdout_path())?;
    let stderr = open_log(spec.stderr_path())?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&opts.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    let mut child = cmd.spawn().map_err(|source| RunFault::Spawn {
        program: program.clone(),
        source,
    })?;
    let status = child.wait().map_err(|source| RunFault::Wait {
        program: program.clone(),
        source,
    })?;
    Ok(exit_code_of(status))
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

use crate::params::ParamMap;
use crate::run_spec::RunSpec;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sweep_core::{atomic_write_json_pretty, now_unix_s, round_micros};
use tracing::error;

/// Exit code recorded when the orchestrator itself failed the run.
pub const FAULT_EXIT_CODE: i32 = 127;

/// The persisted `meta.json` record. The phase-1 form carries everything up
/// to `start_time_unix_s`; the completion fields are filled in by phase 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub params: ParamMap,
    pub ablation_name: String,
    pub ablation_flags: Vec<String>,
    pub cmd: Vec<String>,
    pub cwd: String,
    pub start_time_unix_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_unix_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time_s: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunMeta {
    pub fn started(spec: &RunSpec, cwd: &Path) -> Self {
        Self {
            run_id: spec.run_id.clone(),
            params: spec.params.clone(),
            ablation_name: spec.ablation_name.clone(),
            ablation_flags: spec.ablation_flags.clone(),
            cmd: spec.cmd.clone(),
            cwd: cwd.to_string_lossy().to_string(),
            start_time_unix_s: now_unix_s(),
            end_time_unix_s: None,
            wall_time_s: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn finished(&self, wall_time_s: f64, exit_code: i32, error: Option<String>) -> Self {
        Self {
            end_time_unix_s: Some(now_unix_s()),
            wall_time_s: Some(round_micros(wall_time_s)),
            exit_code: Some(exit_code),
            error,
            ..self.clone()
        }
    }

    /// True once the phase-2 fields are present.
    pub fn is_complete(&self) -> bool {
        self.exit_code.is_some()
    }
}

pub fn write_meta(path: &Path, meta: &RunMeta) -> Result<()> {
    atomic_write_json_pretty(path, &serde_json::to_value(meta)?)
}

/// Owns the phase-2 write for one run. If the worker leaves the run without
/// calling `finish` (an early return or a panic), the record is still closed
/// out as an orchestrator fault.
pub struct MetaGuard {
    path: PathBuf,
    meta: RunMeta,
    started: std::time::Instant,
    done: bool,
}

impl MetaGuard {
    pub fn new(path: &Path, meta: RunMeta) -> Self {
        Self {
            path: path.to_path_buf(),
            meta,
            started: std::time::Instant::now(),
            done: false,
        }
    }

    pub fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn finish(&mut self, exit_code: i32, error: Option<String>) -> Result<()> {
        self.done = true;
        let finished = self.meta.finished(self.elapsed_s(), exit_code, error);
        write_meta(&self.path, &finished)
    }
}

impl Drop for MetaGuard {
    fn drop(&mut self) {
        if !self.done {
            let finished =
                self.meta
                    .finished(self.elapsed_s(), FAULT_EXIT_CODE, Some("aborted".to_string()));
            if let Err(err) = write_meta(&self.path, &finished) {
                error!(run_id = %self.meta.run_id, "failed to finalize meta.json: {:#}", err);
            }
        }
    }
}

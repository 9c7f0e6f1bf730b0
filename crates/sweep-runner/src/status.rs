use crate::resume::meta_matches;
use crate::run_spec::RunSpec;
use serde_json::Value;
use std::collections::BTreeMap;
use sweep_core::load_json_file;

/// What the on-disk record says about a planned run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Pending,
    Interrupted,
    Succeeded,
    Failed(i64),
    Stale,
    Corrupt,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Interrupted => "interrupted",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Stale => "stale",
            Self::Corrupt => "corrupt",
        }
    }
}

pub fn run_status(spec: &RunSpec) -> RunStatus {
    let path = spec.meta_path();
    if !path.is_file() {
        return RunStatus::Pending;
    }
    let meta = match load_json_file(&path) {
        Ok(v) => v,
        Err(_) => return RunStatus::Corrupt,
    };
    if !meta_matches(&meta, spec) {
        return RunStatus::Stale;
    }
    match meta.get("exit_code").and_then(Value::as_i64) {
        None => RunStatus::Interrupted,
        Some(0) => RunStatus::Succeeded,
        Some(code) => RunStatus::Failed(code),
    }
}

/// Status of every planned run, in plan order, plus counts per status.
pub fn sweep_status(specs: &[RunSpec]) -> (Vec<(String, RunStatus)>, BTreeMap<&'static str, usize>) {
    let mut counts = BTreeMap::new();
    let rows = specs
        .iter()
        .map(|spec| {
            let status = run_status(spec);
            *counts.entry(status.as_str()).or_insert(0) += 1;
            (spec.run_id.clone(), status)
        })
        .collect();
    (rows, counts)
}
